//! Boolean and enumerated views over bit-packed integer fields.
//!
//! A [`MaskedView`] is active when `(backing & mask) == expected`.
//! Activating it rewrites only the masked bits. Independent bits of one byte
//! are separate flag views; a [`VariantFamily`] groups views that share one
//! mask and are therefore mutually exclusive by construction.

use crate::collection::Collection;
use crate::field::{FieldError, FieldMap};
use crate::handle::RecordHandle;
use crate::id::FieldIndex;
use crate::value::{Slot, Value};

/// Raw backing value; absent or non-integer storage reads as 0.
fn backing(fields: &FieldMap, field: FieldIndex) -> u64 {
    match fields.get(&field) {
        Some(Slot::Value(Value::Int(v))) => *v as u64,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// MaskedView
// ---------------------------------------------------------------------------

/// A view of `mask`ed bits of an integer field compared against `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedView {
    pub name: String,
    pub field: FieldIndex,
    pub mask: u64,
    pub expected: u64,
}

impl MaskedView {
    pub fn new(name: &str, field: FieldIndex, mask: u64, expected: u64) -> Self {
        Self {
            name: name.to_string(),
            field,
            mask,
            expected,
        }
    }

    /// A single independent flag: active when all `bits` are set.
    pub fn flag(name: &str, field: FieldIndex, bits: u64) -> Self {
        Self::new(name, field, bits, bits)
    }

    /// Whether this view is a plain flag (and therefore clearable).
    pub fn is_flag(&self) -> bool {
        self.mask != 0 && self.mask == self.expected
    }

    /// Complement view with no backing storage of its own.
    pub fn inverted(&self, name: &str) -> InvertedView {
        InvertedView {
            name: name.to_string(),
            of: self.clone(),
        }
    }

    pub fn is_active_in(&self, fields: &FieldMap) -> bool {
        backing(fields, self.field) & self.mask == self.expected
    }

    /// New backing value with this view activated.
    pub fn activated(&self, fields: &FieldMap) -> u64 {
        (backing(fields, self.field) & !self.mask) | self.expected
    }

    /// New backing value with this view's bits cleared.
    pub fn cleared(&self, fields: &FieldMap) -> u64 {
        backing(fields, self.field) & !self.mask
    }

    pub fn is_active(&self, coll: &Collection, handle: RecordHandle) -> Result<bool, FieldError> {
        Ok(self.is_active_in(coll.store().fields(handle.id())?))
    }

    pub fn activate(&self, coll: &mut Collection, handle: RecordHandle) -> Result<(), FieldError> {
        let value = self.activated(coll.store().fields(handle.id())?);
        self.store(coll, handle, value)
    }

    /// Clear the flag's bits. Only plain flags can be cleared; other
    /// variants are switched off by activating a sibling.
    pub fn clear(&self, coll: &mut Collection, handle: RecordHandle) -> Result<(), FieldError> {
        if !self.is_flag() {
            return Err(FieldError::NotAFlag(self.name.clone()));
        }
        let value = self.cleared(coll.store().fields(handle.id())?);
        self.store(coll, handle, value)
    }

    fn store(&self, coll: &mut Collection, handle: RecordHandle, value: u64) -> Result<(), FieldError> {
        let descriptor = coll
            .schema_of(handle)?
            .field(self.field)
            .cloned()
            .ok_or_else(|| FieldError::UnknownField(self.name.clone()))?;
        descriptor.set(coll, handle, Value::Int(value as i64))
    }
}

// ---------------------------------------------------------------------------
// InvertedView
// ---------------------------------------------------------------------------

/// Negation of a flag view. Activating it clears the underlying flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvertedView {
    pub name: String,
    pub of: MaskedView,
}

impl InvertedView {
    pub fn is_active_in(&self, fields: &FieldMap) -> bool {
        !self.of.is_active_in(fields)
    }

    pub fn is_active(&self, coll: &Collection, handle: RecordHandle) -> Result<bool, FieldError> {
        Ok(!self.of.is_active(coll, handle)?)
    }

    pub fn activate(&self, coll: &mut Collection, handle: RecordHandle) -> Result<(), FieldError> {
        self.of.clear(coll, handle)
    }
}

// ---------------------------------------------------------------------------
// VariantFamily
// ---------------------------------------------------------------------------

/// Mutually exclusive variants sharing one mask of one backing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFamily {
    pub name: String,
    pub field: FieldIndex,
    pub mask: u64,
    pub variants: Vec<MaskedView>,
}

impl VariantFamily {
    pub fn new(name: &str, field: FieldIndex, mask: u64, variants: &[(&str, u64)]) -> Self {
        Self {
            name: name.to_string(),
            field,
            mask,
            variants: variants
                .iter()
                .map(|(n, expected)| MaskedView::new(n, field, mask, *expected))
                .collect(),
        }
    }

    /// Check that every expected value fits inside the mask and that no
    /// two variants share one. Returns the offending variant name.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = Vec::new();
        for v in &self.variants {
            if v.expected & !self.mask != 0 || seen.contains(&v.expected) {
                return Err(v.name.clone());
            }
            seen.push(v.expected);
        }
        Ok(())
    }

    pub fn variant(&self, name: &str) -> Option<&MaskedView> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Name of the active variant, if the masked bits match one.
    pub fn active_in(&self, fields: &FieldMap) -> Option<&str> {
        self.variants
            .iter()
            .find(|v| v.is_active_in(fields))
            .map(|v| v.name.as_str())
    }

    pub fn active(&self, coll: &Collection, handle: RecordHandle) -> Result<Option<&str>, FieldError> {
        Ok(self.active_in(coll.store().fields(handle.id())?))
    }

    pub fn activate(&self, coll: &mut Collection, handle: RecordHandle, variant: &str) -> Result<(), FieldError> {
        self.variant(variant)
            .ok_or_else(|| FieldError::UnknownField(variant.to_string()))?
            .activate(coll, handle)
    }
}
