//! Physical record storage.
//!
//! One [`PhysicalRecord`] per record instance found in (or created for) a
//! plugin file. Each keeps its on-disk field state and, once edited, a
//! private copy holding the in-memory edits. Handles are plain `RecordId`
//! keys into the store, so every handle to the same instance sees the same
//! data.

use crate::field::FieldMap;
use crate::formid::FormId;
use crate::id::{FileId, RecordId, TypeTag};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from touching a record instance that is no longer usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record {0:?} has been unloaded")]
    Unloaded(RecordId),
    #[error("record {0:?} has been deleted")]
    Deleted(RecordId),
}

// ---------------------------------------------------------------------------
// PhysicalRecord
// ---------------------------------------------------------------------------

/// One file-resident record instance.
#[derive(Debug, Clone)]
pub struct PhysicalRecord {
    pub file: FileId,
    pub type_tag: TypeTag,
    pub form_id: FormId,
    on_disk: FieldMap,
    edits: Option<FieldMap>,
    deleted: bool,
}

impl PhysicalRecord {
    /// A record as read from disk.
    pub fn loaded(file: FileId, type_tag: TypeTag, form_id: FormId, fields: FieldMap) -> Self {
        Self {
            file,
            type_tag,
            form_id,
            on_disk: fields,
            edits: None,
            deleted: false,
        }
    }

    /// A record created in memory. It has no on-disk state; `fields` is its
    /// first edit.
    pub fn created(file: FileId, type_tag: TypeTag, form_id: FormId, fields: FieldMap) -> Self {
        Self {
            file,
            type_tag,
            form_id,
            on_disk: FieldMap::new(),
            edits: Some(fields),
            deleted: false,
        }
    }

    /// Visible field state: edits if any, otherwise on-disk data.
    pub fn fields(&self) -> &FieldMap {
        self.edits.as_ref().unwrap_or(&self.on_disk)
    }

    pub fn is_modified(&self) -> bool {
        self.edits.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Slot-keyed storage for every physical record in a collection.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: SlotMap<RecordId, PhysicalRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            records: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, record: PhysicalRecord) -> RecordId {
        self.records.insert(record)
    }

    /// Live record, rejecting unloaded and deleted instances.
    pub fn get(&self, id: RecordId) -> Result<&PhysicalRecord, RecordError> {
        match self.records.get(id) {
            None => Err(RecordError::Unloaded(id)),
            Some(r) if r.deleted => Err(RecordError::Deleted(id)),
            Some(r) => Ok(r),
        }
    }

    /// Record including deleted instances (used by the save path).
    pub fn get_any(&self, id: RecordId) -> Option<&PhysicalRecord> {
        self.records.get(id)
    }

    fn get_mut(&mut self, id: RecordId) -> Result<&mut PhysicalRecord, RecordError> {
        match self.records.get_mut(id) {
            None => Err(RecordError::Unloaded(id)),
            Some(r) if r.deleted => Err(RecordError::Deleted(id)),
            Some(r) => Ok(r),
        }
    }

    pub fn is_live(&self, id: RecordId) -> bool {
        self.get(id).is_ok()
    }

    pub fn fields(&self, id: RecordId) -> Result<&FieldMap, RecordError> {
        Ok(self.get(id)?.fields())
    }

    /// Mutable field state. The first mutable access copies the on-disk
    /// state into the edit buffer.
    pub fn fields_mut(&mut self, id: RecordId) -> Result<&mut FieldMap, RecordError> {
        let record = self.get_mut(id)?;
        let on_disk = &record.on_disk;
        Ok(record.edits.get_or_insert_with(|| on_disk.clone()))
    }

    /// Replace the visible field state wholesale.
    pub fn replace_fields(&mut self, id: RecordId, fields: FieldMap) -> Result<(), RecordError> {
        self.get_mut(id)?.edits = Some(fields);
        Ok(())
    }

    /// Drop in-memory edits. Idempotent.
    pub fn reset(&mut self, id: RecordId) -> Result<(), RecordError> {
        self.get_mut(id)?.edits = None;
        Ok(())
    }

    /// Mark the instance for removal from its file.
    pub fn delete(&mut self, id: RecordId) -> Result<(), RecordError> {
        self.get_mut(id)?.deleted = true;
        Ok(())
    }

    /// Make the current edits the new on-disk state.
    pub fn commit(&mut self, id: RecordId) -> Result<(), RecordError> {
        let record = self.get_mut(id)?;
        if let Some(edits) = record.edits.take() {
            record.on_disk = edits;
        }
        Ok(())
    }

    /// Drop the instance from memory entirely.
    pub fn remove(&mut self, id: RecordId) -> Option<PhysicalRecord> {
        self.records.remove(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
