//! Primitive field types and the values stored for them.

use crate::field::FieldError;
use crate::formid::FormId;
use crate::id::FieldIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Primitive types
// ---------------------------------------------------------------------------

/// Width of a fixed-size integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    /// Wrap `v` to this width using two's complement.
    pub fn wrap(self, v: i64, signed: bool) -> i64 {
        let bits = self.bits();
        if bits == 64 {
            return v;
        }
        let mask = (1u64 << bits) - 1;
        let raw = (v as u64) & mask;
        if signed && raw & (1u64 << (bits - 1)) != 0 {
            (raw | !mask) as i64
        } else {
            raw as i64
        }
    }
}

/// Comparison mode for string fields. Storage is never case-folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StringCase {
    /// Free text: exact comparison.
    #[default]
    Sensitive,
    /// Identifier-like text: ASCII case is ignored when comparing.
    Insensitive,
}

/// The primitive type of a scalar field slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Int { width: IntWidth, signed: bool },
    Float32,
    Bool,
    /// Opaque payload of a fixed byte length.
    FixedBytes(usize),
    /// Text; `fixed` caps the stored byte length.
    String { fixed: Option<usize>, case: StringCase },
    FormId,
    FormIdOrInt,
    FormIdOrFloat,
    FormIdOrString,
}

impl Primitive {
    pub const U8: Primitive = Primitive::Int { width: IntWidth::W8, signed: false };
    pub const U16: Primitive = Primitive::Int { width: IntWidth::W16, signed: false };
    pub const U32: Primitive = Primitive::Int { width: IntWidth::W32, signed: false };
    pub const I8: Primitive = Primitive::Int { width: IntWidth::W8, signed: true };
    pub const I16: Primitive = Primitive::Int { width: IntWidth::W16, signed: true };
    pub const I32: Primitive = Primitive::Int { width: IntWidth::W32, signed: true };
    pub const I64: Primitive = Primitive::Int { width: IntWidth::W64, signed: true };
    pub const TEXT: Primitive = Primitive::String { fixed: None, case: StringCase::Sensitive };
    pub const IDENT: Primitive = Primitive::String { fixed: None, case: StringCase::Insensitive };

    /// Whether values of this type are opaque payloads kept only for
    /// round-trip fidelity.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Primitive::FixedBytes(_))
    }

    /// Whether this type is an integer usable as a masked-view backing field.
    pub fn is_integer(&self) -> bool {
        matches!(self, Primitive::Int { .. })
    }

    /// Whether a stored value decodes under this type. Values of any other
    /// kind decode as unset.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Primitive::Int { .. }, Value::Int(_))
                | (Primitive::Float32, Value::Float(_))
                | (Primitive::Bool, Value::Bool(_))
                | (Primitive::FixedBytes(_), Value::Bytes(_))
                | (Primitive::String { .. }, Value::Str(_))
                | (Primitive::FormId, Value::FormId(_))
                | (Primitive::FormIdOrInt, Value::FormId(_) | Value::Int(_))
                | (Primitive::FormIdOrFloat, Value::FormId(_) | Value::Float(_))
                | (Primitive::FormIdOrString, Value::FormId(_) | Value::Str(_))
        )
    }

    /// Convert an incoming value to its stored form. Integers wrap to the
    /// declared width, fixed strings and byte blobs are cut (or padded) to
    /// their declared length. A value of the wrong kind is rejected.
    pub fn coerce(&self, value: Value) -> Result<Value, FieldError> {
        let found = value.kind();
        match (self, value) {
            (Primitive::Int { width, signed }, Value::Int(v)) => {
                Ok(Value::Int(width.wrap(v, *signed)))
            }
            (Primitive::Float32, Value::Float(v)) => Ok(Value::Float(v)),
            (Primitive::Float32, Value::Int(v)) => Ok(Value::Float(v as f32)),
            (Primitive::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
            (Primitive::FixedBytes(len), Value::Bytes(mut b)) => {
                b.resize(*len, 0);
                Ok(Value::Bytes(b))
            }
            (Primitive::String { fixed, .. }, Value::Str(s)) => Ok(Value::Str(match fixed {
                Some(max) => truncate_at_char(s, *max),
                None => s,
            })),
            (
                Primitive::FormId
                | Primitive::FormIdOrInt
                | Primitive::FormIdOrFloat
                | Primitive::FormIdOrString,
                Value::FormId(id),
            ) => Ok(Value::FormId(id)),
            (Primitive::FormIdOrInt, Value::Int(v)) => Ok(Value::Int(IntWidth::W32.wrap(v, true))),
            (Primitive::FormIdOrFloat, Value::Float(v)) => Ok(Value::Float(v)),
            (Primitive::FormIdOrString, Value::Str(s)) => Ok(Value::Str(s)),
            (expected, _) => Err(FieldError::TypeMismatch {
                expected: *expected,
                found,
            }),
        }
    }

    /// Equality under this type's comparison rules.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (self, a, b) {
            (Primitive::String { case: StringCase::Insensitive, .. }, Value::Str(x), Value::Str(y)) => {
                x.eq_ignore_ascii_case(y)
            }
            _ => a == b,
        }
    }
}

fn truncate_at_char(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Runtime kind of a stored value, as reported for polymorphic fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Bytes,
    Str,
    FormId,
}

/// A scalar value held in a record slot. References are always held in
/// long form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f32),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    FormId(FormId),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Str(_) => ValueKind::Str,
            Value::FormId(_) => ValueKind::FormId,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_form_id(&self) -> Option<&FormId> {
        match self {
            Value::FormId(id) => Some(id),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<FormId> for Value {
    fn from(v: FormId) -> Self {
        Value::FormId(v)
    }
}

// ---------------------------------------------------------------------------
// Storage slots
// ---------------------------------------------------------------------------

/// Raw storage for one field of a record. Lists and fixed arrays are both
/// `Seq`; the field's shape decides how a sequence may change length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// A list element that has been reserved by `grow` but not populated.
    Empty,
    Value(Value),
    Seq(Vec<Slot>),
    Group(BTreeMap<FieldIndex, Slot>),
}

impl Slot {
    /// Visit every reference held anywhere in this slot.
    pub fn for_each_form_id<F: FnMut(&FormId)>(&self, f: &mut F) {
        match self {
            Slot::Value(Value::FormId(id)) => f(id),
            Slot::Seq(items) => items.iter().for_each(|s| s.for_each_form_id(f)),
            Slot::Group(members) => members.values().for_each(|s| s.for_each_form_id(f)),
            _ => {}
        }
    }

    /// Mutable variant of [`Slot::for_each_form_id`].
    pub fn for_each_form_id_mut<F: FnMut(&mut FormId)>(&mut self, f: &mut F) {
        match self {
            Slot::Value(Value::FormId(id)) => f(id),
            Slot::Seq(items) => items.iter_mut().for_each(|s| s.for_each_form_id_mut(f)),
            Slot::Group(members) => members.values_mut().for_each(|s| s.for_each_form_id_mut(f)),
            _ => {}
        }
    }
}

/// Decoded, schema-typed view of a field as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// No storage exists for the slot (distinct from a zero value).
    Unset,
    Value(Value),
    List(Vec<FieldValue>),
    /// Group members in index order, by name.
    Group(Vec<(String, FieldValue)>),
}

impl FieldValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldValue::Unset)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a group member by name.
    pub fn member(&self, name: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Group(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}
