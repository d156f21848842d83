//! Batch identity renumbering: rewrite every reference a record holds
//! according to an old-to-new mapping.

use crate::collection::{Collection, CollectionError};
use crate::field::FieldMap;
use crate::formid::FormId;
use crate::handle::RecordHandle;
use crate::id::FileId;
use crate::store::RecordError;
use std::collections::HashMap;
use tracing::debug;

fn pending(fields: &FieldMap, mapping: &HashMap<FormId, FormId>) -> bool {
    let mut hit = false;
    for slot in fields.values() {
        slot.for_each_form_id(&mut |form| hit |= mapping.get(form).is_some_and(|new| new != form));
    }
    hit
}

/// Rewrite the references of one record. Returns the number of slots that
/// changed; a record with nothing to change is left unmodified.
pub fn remap_record(
    coll: &mut Collection,
    handle: RecordHandle,
    mapping: &HashMap<FormId, FormId>,
) -> Result<usize, RecordError> {
    if !pending(coll.store().fields(handle.id())?, mapping) {
        return Ok(0);
    }
    let fields = coll.store_mut().fields_mut(handle.id())?;
    let mut changed = 0;
    for slot in fields.values_mut() {
        slot.for_each_form_id_mut(&mut |form| {
            if form.remap(mapping) {
                changed += 1;
            }
        });
    }
    Ok(changed)
}

/// Rewrite the references of every live record in `file`.
pub fn remap_file(
    coll: &mut Collection,
    file: FileId,
    mapping: &HashMap<FormId, FormId>,
) -> Result<usize, CollectionError> {
    if coll.file(file).is_none() {
        return Err(CollectionError::UnknownFile(file));
    }
    let mut changed = 0;
    for handle in coll.records(file) {
        changed += remap_record(coll, handle, mapping)?;
    }
    debug!(changed, "remapped references in file");
    Ok(changed)
}
