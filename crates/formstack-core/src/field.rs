//! Declarative field descriptors.
//!
//! A [`FieldDescriptor`] names one logical field of a record type: its
//! numeric index (which also fixes on-disk ordering) and its [`Shape`]. Shapes
//! nest: a list of groups, a list of lists of integers, a fixed array of
//! floats, and so on. Every read and write goes through the descriptor, so a
//! record type never needs hand-written parsing code.
//!
//! Lists change length only through [`FieldDescriptor::grow`]. Writing an
//! element that has not been grown yet is an error, never an implicit append.

use crate::collection::Collection;
use crate::handle::RecordHandle;
use crate::id::FieldIndex;
use crate::store::RecordError;
use crate::value::{FieldValue, Primitive, Slot, Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stored fields of one record, keyed (and therefore ordered) by index.
pub type FieldMap = BTreeMap<FieldIndex, Slot>;

/// Deepest list nesting a shape may declare (list of list of list).
pub const MAX_LIST_DEPTH: usize = 3;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from reading or writing a field.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: Primitive, found: ValueKind },
    #[error("index {index} out of bounds for current list length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("path step {step} does not match the field shape")]
    InvalidPath { step: usize },
    #[error("path does not end at a scalar slot")]
    NotScalar,
    #[error("path does not end at a list")]
    NotList,
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("view '{0}' is not a clearable flag")]
    NotAFlag(String),
    #[error("record type {0} has no schema")]
    NoSchema(String),
    #[error(transparent)]
    Record(#[from] RecordError),
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// A named, reusable layout of fields used as a fixed sub-block.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLayout {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl GroupLayout {
    pub fn new(name: &str, fields: Vec<FieldDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields,
        })
    }

    pub fn member(&self, index: FieldIndex) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.index == index)
    }

    pub fn member_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Structural shape of a field. Nesting is expressed recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar(Primitive),
    FixedArray { len: usize, element: Box<Shape> },
    List(Box<Shape>),
    Group(Arc<GroupLayout>),
}

impl Shape {
    pub fn list(element: Shape) -> Self {
        Shape::List(Box::new(element))
    }

    pub fn array(len: usize, element: Shape) -> Self {
        Shape::FixedArray {
            len,
            element: Box::new(element),
        }
    }

    /// Deepest chain of nested lists anywhere in this shape.
    pub fn list_depth(&self) -> usize {
        match self {
            Shape::Scalar(_) => 0,
            Shape::FixedArray { element, .. } => element.list_depth(),
            Shape::List(element) => 1 + element.list_depth(),
            Shape::Group(layout) => layout
                .fields
                .iter()
                .map(|f| f.shape.list_depth())
                .max()
                .unwrap_or(0),
        }
    }

    /// Whether every leaf of this shape is an opaque payload.
    pub fn is_opaque(&self) -> bool {
        match self {
            Shape::Scalar(p) => p.is_opaque(),
            Shape::FixedArray { element, .. } | Shape::List(element) => element.is_opaque(),
            Shape::Group(layout) => {
                !layout.fields.is_empty() && layout.fields.iter().all(|f| f.is_opaque())
            }
        }
    }

    /// Decode a stored slot. Absent or mistyped storage decodes as the typed
    /// empty value: `Unset` for scalars, arrays and groups, `[]` for lists.
    pub fn decode(&self, slot: Option<&Slot>) -> FieldValue {
        match (self, slot) {
            (Shape::Scalar(p), Some(Slot::Value(v))) if p.accepts(v) => FieldValue::Value(v.clone()),
            (Shape::Scalar(_), _) => FieldValue::Unset,
            (Shape::FixedArray { len, element }, Some(Slot::Seq(items))) => {
                FieldValue::List((0..*len).map(|i| element.decode(items.get(i))).collect())
            }
            (Shape::FixedArray { .. }, _) => FieldValue::Unset,
            (Shape::List(element), Some(Slot::Seq(items))) => {
                FieldValue::List(items.iter().map(|s| element.decode(Some(s))).collect())
            }
            (Shape::List(_), _) => FieldValue::List(Vec::new()),
            (Shape::Group(layout), Some(Slot::Group(members))) => FieldValue::Group(
                layout
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.shape.decode(members.get(&f.index))))
                    .collect(),
            ),
            (Shape::Group(_), _) => FieldValue::Unset,
        }
    }

    /// Structural equality under each leaf's comparison rules.
    pub fn values_equal(&self, a: &FieldValue, b: &FieldValue) -> bool {
        match (self, a, b) {
            (Shape::Scalar(p), FieldValue::Value(x), FieldValue::Value(y)) => p.values_equal(x, y),
            (
                Shape::FixedArray { element, .. } | Shape::List(element),
                FieldValue::List(xs),
                FieldValue::List(ys),
            ) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| element.values_equal(x, y)),
            (Shape::Group(layout), FieldValue::Group(xs), FieldValue::Group(ys)) => layout
                .fields
                .iter()
                .zip(xs.iter().zip(ys))
                .all(|(f, ((_, x), (_, y)))| f.shape.values_equal(x, y)),
            _ => a == b,
        }
    }

    /// Shape reached by following `steps`.
    pub(crate) fn at(&self, steps: &[Step], depth: usize) -> Result<&Shape, FieldError> {
        let Some((step, rest)) = steps.split_first() else {
            return Ok(self);
        };
        match (self, step) {
            (Shape::FixedArray { element, .. } | Shape::List(element), Step::Index(_)) => {
                element.at(rest, depth + 1)
            }
            (Shape::Group(layout), Step::Member(m)) => layout
                .member(*m)
                .ok_or(FieldError::InvalidPath { step: depth })?
                .shape
                .at(rest, depth + 1),
            _ => Err(FieldError::InvalidPath { step: depth }),
        }
    }

    /// Validate that `steps` address existing (or, for fixed arrays and
    /// groups, implicitly creatable) storage.
    fn check(&self, slot: Option<&Slot>, steps: &[Step], depth: usize) -> Result<(), FieldError> {
        let Some((step, rest)) = steps.split_first() else {
            return Ok(());
        };
        match (self, step) {
            (Shape::FixedArray { len, element }, Step::Index(i)) => {
                if *i >= *len {
                    return Err(FieldError::IndexOutOfBounds { index: *i, len: *len });
                }
                element.check(seq_item(slot, *i), rest, depth + 1)
            }
            (Shape::List(element), Step::Index(i)) => {
                let len = seq_len(slot);
                if *i >= len {
                    return Err(FieldError::IndexOutOfBounds { index: *i, len });
                }
                element.check(seq_item(slot, *i), rest, depth + 1)
            }
            (Shape::Group(layout), Step::Member(m)) => {
                let member = layout.member(*m).ok_or(FieldError::InvalidPath { step: depth })?;
                let child = match slot {
                    Some(Slot::Group(members)) => members.get(m),
                    _ => None,
                };
                member.shape.check(child, rest, depth + 1)
            }
            _ => Err(FieldError::InvalidPath { step: depth }),
        }
    }

    /// Follow `steps`, materializing fixed-array and group containers, and
    /// return the slot at the end. List elements must already exist.
    fn slot_mut<'a>(&self, slot: &'a mut Slot, steps: &[Step], depth: usize) -> Result<&'a mut Slot, FieldError> {
        let Some((step, rest)) = steps.split_first() else {
            return Ok(slot);
        };
        match (self, step) {
            (Shape::FixedArray { len, element }, Step::Index(i)) => {
                if !matches!(slot, Slot::Seq(_)) {
                    *slot = Slot::Seq(Vec::new());
                }
                let Slot::Seq(items) = slot else {
                    return Err(FieldError::InvalidPath { step: depth });
                };
                if items.len() < *len {
                    items.resize(*len, Slot::Empty);
                }
                let len = items.len();
                let item = items
                    .get_mut(*i)
                    .ok_or(FieldError::IndexOutOfBounds { index: *i, len })?;
                element.slot_mut(item, rest, depth + 1)
            }
            (Shape::List(element), Step::Index(i)) => {
                let Slot::Seq(items) = slot else {
                    return Err(FieldError::IndexOutOfBounds { index: *i, len: 0 });
                };
                let len = items.len();
                let item = items
                    .get_mut(*i)
                    .ok_or(FieldError::IndexOutOfBounds { index: *i, len })?;
                element.slot_mut(item, rest, depth + 1)
            }
            (Shape::Group(layout), Step::Member(m)) => {
                let member = layout.member(*m).ok_or(FieldError::InvalidPath { step: depth })?;
                if !matches!(slot, Slot::Group(_)) {
                    *slot = Slot::Group(BTreeMap::new());
                }
                let Slot::Group(members) = slot else {
                    return Err(FieldError::InvalidPath { step: depth });
                };
                member.shape.slot_mut(members.entry(*m).or_insert(Slot::Empty), rest, depth + 1)
            }
            _ => Err(FieldError::InvalidPath { step: depth }),
        }
    }

    fn read(&self, slot: Option<&Slot>, steps: &[Step], depth: usize) -> Result<FieldValue, FieldError> {
        let Some((step, rest)) = steps.split_first() else {
            return Ok(self.decode(slot));
        };
        match (self, step) {
            (Shape::FixedArray { len, element }, Step::Index(i)) => {
                if *i >= *len {
                    return Err(FieldError::IndexOutOfBounds { index: *i, len: *len });
                }
                element.read(seq_item(slot, *i), rest, depth + 1)
            }
            (Shape::List(element), Step::Index(i)) => {
                let len = seq_len(slot);
                if *i >= len {
                    return Err(FieldError::IndexOutOfBounds { index: *i, len });
                }
                element.read(seq_item(slot, *i), rest, depth + 1)
            }
            (Shape::Group(layout), Step::Member(m)) => {
                let member = layout.member(*m).ok_or(FieldError::InvalidPath { step: depth })?;
                let child = match slot {
                    Some(Slot::Group(members)) => members.get(m),
                    _ => None,
                };
                member.shape.read(child, rest, depth + 1)
            }
            _ => Err(FieldError::InvalidPath { step: depth }),
        }
    }
}

fn seq_len(slot: Option<&Slot>) -> usize {
    match slot {
        Some(Slot::Seq(items)) => items.len(),
        _ => 0,
    }
}

fn seq_item(slot: Option<&Slot>, i: usize) -> Option<&Slot> {
    match slot {
        Some(Slot::Seq(items)) => items.get(i),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step below a field: an element index or a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Index(usize),
    Member(FieldIndex),
}

// ---------------------------------------------------------------------------
// FieldDescriptor
// ---------------------------------------------------------------------------

/// How to read and write one logical field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub index: FieldIndex,
    pub shape: Shape,
    /// Unknown or deprecated data kept only for faithful round-trips.
    pub unknown: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, index: u32, shape: Shape) -> Self {
        Self {
            name: name.to_string(),
            index: FieldIndex(index),
            shape,
            unknown: false,
        }
    }

    pub fn scalar(name: &str, index: u32, primitive: Primitive) -> Self {
        Self::new(name, index, Shape::Scalar(primitive))
    }

    pub fn array(name: &str, index: u32, len: usize, primitive: Primitive) -> Self {
        Self::new(name, index, Shape::array(len, Shape::Scalar(primitive)))
    }

    pub fn list(name: &str, index: u32, element: Shape) -> Self {
        Self::new(name, index, Shape::list(element))
    }

    pub fn group(name: &str, index: u32, layout: Arc<GroupLayout>) -> Self {
        Self::new(name, index, Shape::Group(layout))
    }

    /// Mark as unknown/deprecated data.
    pub fn unknown(mut self) -> Self {
        self.unknown = true;
        self
    }

    /// Opaque fields round-trip but never take part in diffs.
    pub fn is_opaque(&self) -> bool {
        self.unknown || self.shape.is_opaque()
    }

    // -- Operations on raw field maps --

    /// Decode the whole field.
    pub fn read(&self, fields: &FieldMap) -> FieldValue {
        self.shape.decode(fields.get(&self.index))
    }

    /// Decode the value at `steps` below this field.
    pub fn read_at(&self, fields: &FieldMap, steps: &[Step]) -> Result<FieldValue, FieldError> {
        self.shape.read(fields.get(&self.index), steps, 0)
    }

    /// Store `value` in the scalar slot at `steps`.
    pub fn write_at(&self, fields: &mut FieldMap, steps: &[Step], value: Value) -> Result<(), FieldError> {
        let value = self.checked_write(fields, steps, value)?;
        self.store_checked(fields, steps, value)
    }

    /// Validate a write of `value` at `steps` without touching `fields`.
    fn checked_write(&self, fields: &FieldMap, steps: &[Step], value: Value) -> Result<Value, FieldError> {
        let Shape::Scalar(primitive) = self.shape.at(steps, 0)? else {
            return Err(FieldError::NotScalar);
        };
        self.shape.check(fields.get(&self.index), steps, 0)?;
        primitive.coerce(value)
    }

    fn store_checked(&self, fields: &mut FieldMap, steps: &[Step], value: Value) -> Result<(), FieldError> {
        let root = fields.entry(self.index).or_insert(Slot::Empty);
        *self.shape.slot_mut(root, steps, 0)? = Slot::Value(value);
        Ok(())
    }

    /// Current length of the list at `steps` (0 when absent).
    pub fn len_at(&self, fields: &FieldMap, steps: &[Step]) -> Result<usize, FieldError> {
        match self.shape.at(steps, 0)? {
            Shape::List(_) | Shape::FixedArray { .. } => {}
            _ => return Err(FieldError::NotList),
        }
        match self.read_at(fields, steps)? {
            FieldValue::List(items) => Ok(items.len()),
            _ => Ok(0),
        }
    }

    /// Reserve one new element at the end of the list at `steps` and
    /// return its index.
    pub fn grow_at(&self, fields: &mut FieldMap, steps: &[Step]) -> Result<usize, FieldError> {
        if !matches!(self.shape.at(steps, 0)?, Shape::List(_)) {
            return Err(FieldError::NotList);
        }
        self.shape.check(fields.get(&self.index), steps, 0)?;
        let root = fields.entry(self.index).or_insert(Slot::Empty);
        let slot = self.shape.slot_mut(root, steps, 0)?;
        match slot {
            Slot::Seq(items) => {
                items.push(Slot::Empty);
                Ok(items.len() - 1)
            }
            _ => {
                *slot = Slot::Seq(vec![Slot::Empty]);
                Ok(0)
            }
        }
    }

    /// Remove the element at `index` from the list at `steps`.
    pub fn remove_at(&self, fields: &mut FieldMap, steps: &[Step], index: usize) -> Result<(), FieldError> {
        let len = self.len_at(fields, steps)?;
        if index >= len || !matches!(self.shape.at(steps, 0)?, Shape::List(_)) {
            return Err(FieldError::IndexOutOfBounds { index, len });
        }
        let root = fields.entry(self.index).or_insert(Slot::Empty);
        match self.shape.slot_mut(root, steps, 0)? {
            Slot::Seq(items) if index < items.len() => {
                items.remove(index);
                Ok(())
            }
            _ => Err(FieldError::IndexOutOfBounds { index, len }),
        }
    }

    /// Whether this field holds equal values in two records.
    pub fn equal_in(&self, a: &FieldMap, b: &FieldMap) -> bool {
        self.shape.values_equal(&self.read(a), &self.read(b))
    }

    // -- Operations through a record handle --

    /// Read the whole field of `handle`.
    pub fn get(&self, coll: &Collection, handle: RecordHandle) -> Result<FieldValue, FieldError> {
        Ok(self.read(coll.store().fields(handle.id())?))
    }

    /// Read the element at `steps` of `handle`'s field.
    pub fn get_at(&self, coll: &Collection, handle: RecordHandle, steps: &[Step]) -> Result<FieldValue, FieldError> {
        self.read_at(coll.store().fields(handle.id())?, steps)
    }

    /// Write a scalar field of `handle`.
    pub fn set(&self, coll: &mut Collection, handle: RecordHandle, value: Value) -> Result<(), FieldError> {
        self.set_at(coll, handle, &[], value)
    }

    /// Write the scalar slot at `steps` of `handle`'s field.
    pub fn set_at(
        &self,
        coll: &mut Collection,
        handle: RecordHandle,
        steps: &[Step],
        value: Value,
    ) -> Result<(), FieldError> {
        // Rejected writes must not mark the record modified.
        let value = self.checked_write(coll.store().fields(handle.id())?, steps, value)?;
        self.store_checked(coll.store_mut().fields_mut(handle.id())?, steps, value)
    }

    /// Reserve a new element in `handle`'s list at `steps`.
    pub fn grow(&self, coll: &mut Collection, handle: RecordHandle, steps: &[Step]) -> Result<usize, FieldError> {
        if !matches!(self.shape.at(steps, 0)?, Shape::List(_)) {
            return Err(FieldError::NotList);
        }
        self.shape.check(coll.store().fields(handle.id())?.get(&self.index), steps, 0)?;
        self.grow_at(coll.store_mut().fields_mut(handle.id())?, steps)
    }

    /// Length of `handle`'s list at `steps`.
    pub fn len(&self, coll: &Collection, handle: RecordHandle, steps: &[Step]) -> Result<usize, FieldError> {
        self.len_at(coll.store().fields(handle.id())?, steps)
    }

    /// Runtime kind of the value stored at `steps`, for polymorphic fields.
    pub fn runtime_kind(
        &self,
        coll: &Collection,
        handle: RecordHandle,
        steps: &[Step],
    ) -> Result<Option<ValueKind>, FieldError> {
        Ok(self.get_at(coll, handle, steps)?.as_value().map(Value::kind))
    }
}
