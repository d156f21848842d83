//! Record handles: `Copy` keys naming one physical record instance.
//!
//! A handle carries no data of its own. Every accessor takes the
//! [`Collection`] that owns the instance, and every handle to the same
//! instance sees the same fields. Once the instance is unloaded or deleted,
//! every call through the handle fails with a [`RecordError`].

use crate::collection::Collection;
use crate::field::{FieldDescriptor, FieldError, Step};
use crate::formid::FormId;
use crate::id::{FileId, RecordId, TypeTag};
use crate::resolver::{self, Diff, ResolveError};
use crate::schema::RecordSchema;
use crate::store::RecordError;
use crate::value::{FieldValue, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    id: RecordId,
}

impl RecordHandle {
    pub(crate) fn new(id: RecordId) -> Self {
        Self { id }
    }

    pub fn id(self) -> RecordId {
        self.id
    }

    // -- Identity --

    pub fn type_tag(self, coll: &Collection) -> Result<TypeTag, RecordError> {
        Ok(coll.store().get(self.id)?.type_tag)
    }

    pub fn form_id(self, coll: &Collection) -> Result<FormId, RecordError> {
        Ok(coll.store().get(self.id)?.form_id.clone())
    }

    /// File holding this instance.
    pub fn file(self, coll: &Collection) -> Result<FileId, RecordError> {
        Ok(coll.store().get(self.id)?.file)
    }

    /// Whether two handles name the same identity (possibly in different
    /// files).
    pub fn same_identity(self, other: RecordHandle, coll: &Collection) -> Result<bool, RecordError> {
        Ok(self.form_id(coll)? == other.form_id(coll)?)
    }

    pub fn schema(self, coll: &Collection) -> Result<Arc<RecordSchema>, FieldError> {
        coll.schema_of(self).cloned()
    }

    fn with_field<T>(
        self,
        coll: &Collection,
        name: &str,
        f: impl FnOnce(&FieldDescriptor) -> Result<T, FieldError>,
    ) -> Result<T, FieldError> {
        let schema = self.schema(coll)?;
        let field = schema
            .field_by_name(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        f(field)
    }

    // -- Fields --

    pub fn get(self, coll: &Collection, name: &str) -> Result<FieldValue, FieldError> {
        self.with_field(coll, name, |f| f.get(coll, self))
    }

    pub fn get_at(self, coll: &Collection, name: &str, steps: &[Step]) -> Result<FieldValue, FieldError> {
        self.with_field(coll, name, |f| f.get_at(coll, self, steps))
    }

    pub fn set(self, coll: &mut Collection, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        self.set_at(coll, name, &[], value)
    }

    pub fn set_at(
        self,
        coll: &mut Collection,
        name: &str,
        steps: &[Step],
        value: impl Into<Value>,
    ) -> Result<(), FieldError> {
        let schema = self.schema(coll)?;
        let field = schema
            .field_by_name(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        field.set_at(coll, self, steps, value.into())
    }

    /// Append an empty element to the list at `steps` and return its index.
    pub fn grow(self, coll: &mut Collection, name: &str, steps: &[Step]) -> Result<usize, FieldError> {
        let schema = self.schema(coll)?;
        let field = schema
            .field_by_name(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
        field.grow(coll, self, steps)
    }

    pub fn len(self, coll: &Collection, name: &str, steps: &[Step]) -> Result<usize, FieldError> {
        self.with_field(coll, name, |f| f.len(coll, self, steps))
    }

    // -- Masked views --

    /// State of a flag or inverted flag by name.
    pub fn flag(self, coll: &Collection, name: &str) -> Result<bool, FieldError> {
        let schema = self.schema(coll)?;
        if let Some(flag) = schema.flag(name) {
            return flag.is_active(coll, self);
        }
        match schema.inverted_flag(name) {
            Some(view) => view.is_active(coll, self),
            None => Err(FieldError::UnknownField(name.to_string())),
        }
    }

    pub fn set_flag(self, coll: &mut Collection, name: &str, on: bool) -> Result<(), FieldError> {
        let schema = self.schema(coll)?;
        if let Some(flag) = schema.flag(name) {
            return if on { flag.activate(coll, self) } else { flag.clear(coll, self) };
        }
        match schema.inverted_flag(name) {
            Some(view) if on => view.activate(coll, self),
            Some(view) => view.of.activate(coll, self),
            None => Err(FieldError::UnknownField(name.to_string())),
        }
    }

    /// Active variant of a family, if the masked bits match any.
    pub fn variant(self, coll: &Collection, family: &str) -> Result<Option<String>, FieldError> {
        let schema = self.schema(coll)?;
        let family = schema
            .family(family)
            .ok_or_else(|| FieldError::UnknownField(family.to_string()))?;
        Ok(family.active(coll, self)?.map(str::to_string))
    }

    pub fn set_variant(self, coll: &mut Collection, family: &str, variant: &str) -> Result<(), FieldError> {
        let schema = self.schema(coll)?;
        let family = schema
            .family(family)
            .ok_or_else(|| FieldError::UnknownField(family.to_string()))?;
        family.activate(coll, self, variant)
    }

    // -- Lifecycle --

    pub fn is_modified(self, coll: &Collection) -> Result<bool, RecordError> {
        Ok(coll.store().get(self.id)?.is_modified())
    }

    /// Discard in-memory edits.
    pub fn reset(self, coll: &mut Collection) -> Result<(), RecordError> {
        coll.store_mut().reset(self.id)
    }

    /// Drop the instance from memory without marking it deleted.
    pub fn unload(self, coll: &mut Collection) -> Result<(), RecordError> {
        coll.store().get(self.id)?;
        coll.detach_record(self);
        Ok(())
    }

    /// Mark the instance deleted; it is left out when its file is saved.
    pub fn delete(self, coll: &mut Collection) -> Result<(), RecordError> {
        coll.store_mut().delete(self.id)
    }

    /// Containing record named by the schema's parent field. Prefers the
    /// parent's instance in this record's own file, else its winner.
    pub fn parent(self, coll: &Collection) -> Result<Option<RecordHandle>, ResolveError> {
        let schema = self.schema(coll)?;
        let Some(index) = schema.parent_field() else {
            return Ok(None);
        };
        let Some(field) = schema.field(index) else {
            return Ok(None);
        };
        let parent = match field.get(coll, self)? {
            FieldValue::Value(Value::FormId(form)) if !form.is_null() => form,
            _ => return Ok(None),
        };
        let file = self.file(coll)?;
        if let Some(local) = coll.lookup(file, &parent) {
            return Ok(Some(local));
        }
        resolver::winner(coll, &parent, false)
    }

    // -- Duplication --

    /// Copy this record into `target` as an override of the same identity.
    /// Returns `None` when `target` already holds the identity.
    pub fn duplicate_as_override(
        self,
        coll: &mut Collection,
        target: FileId,
        prefer_winning_ancestor: bool,
    ) -> Result<Option<RecordHandle>, ResolveError> {
        let record = coll.store().get(self.id)?;
        let (tag, form) = (record.type_tag, record.form_id.clone());
        if coll.lookup(target, &form).is_some() {
            return Ok(None);
        }
        let source = if prefer_winning_ancestor {
            resolver::winner(coll, &form, false)?.unwrap_or(self)
        } else {
            self
        };
        let fields = coll.store().fields(source.id)?.clone();
        let copy = coll.insert_created(target, tag, form.clone(), fields)?;
        debug!(form = %form, "duplicated record as override");
        Ok(Some(copy))
    }

    /// Copy this record into `target` under a new identity, minted in
    /// `target` when `form` is `None`. Returns `None` when the identity is
    /// already in use anywhere in the load order.
    pub fn duplicate_as_new(
        self,
        coll: &mut Collection,
        target: FileId,
        form: Option<FormId>,
    ) -> Result<Option<RecordHandle>, ResolveError> {
        let record = coll.store().get(self.id)?;
        let tag = record.type_tag;
        let fields = record.fields().clone();
        let form = match form {
            Some(form) => form,
            None => coll.mint_form_id(target)?,
        };
        if form.is_null() || !resolver::override_chain(coll, &form, true)?.is_empty() {
            return Ok(None);
        }
        let copy = coll.insert_created(target, tag, form.clone(), fields)?;
        debug!(form = %form, "duplicated record as new");
        Ok(Some(copy))
    }

    // -- Resolution --

    /// Every instance of this identity in authoritative files, oldest first.
    pub fn history(self, coll: &Collection) -> Result<Vec<RecordHandle>, ResolveError> {
        resolver::override_chain(coll, &self.form_id(coll)?, false)
    }

    pub fn is_winning(self, coll: &Collection, extended: bool) -> Result<bool, ResolveError> {
        resolver::is_winning(coll, self, extended)
    }

    pub fn conflicts(self, coll: &Collection, extended: bool) -> Result<Vec<RecordHandle>, ResolveError> {
        resolver::conflicts(coll, &self.form_id(coll)?, extended)
    }

    /// Attributes (or attribute groups) that differ from the nearest earlier
    /// instance of this identity.
    pub fn diff(self, coll: &Collection, attributes: &[&str]) -> Result<Diff, ResolveError> {
        resolver::diff(coll, self, attributes)
    }
}
