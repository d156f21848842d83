//! One plugin file in the load order: its master list, its scan-only flag
//! and an index of the record instances it holds, keyed by short FormID the
//! same way the on-disk format locates records.

use crate::formid::{FileName, FormId, MasterList, OBJECT_ID_MASK};
use crate::id::RecordId;
use std::collections::HashMap;

/// First object number handed out by [`PluginFile::mint_object_id`]; lower
/// numbers are reserved by the file format.
pub const FIRST_OBJECT_ID: u32 = 0x800;

#[derive(Debug, Clone)]
pub struct PluginFile {
    frame: MasterList,
    /// Included in extended conflict checks but never authoritative.
    pub scan_only: bool,
    entries: Vec<(RecordId, FormId)>,
    index: HashMap<u32, Vec<RecordId>>,
    next_object_id: u32,
}

impl PluginFile {
    pub fn new(name: impl Into<FileName>, masters: Vec<FileName>, scan_only: bool) -> Self {
        Self {
            frame: MasterList::new(name, masters),
            scan_only,
            entries: Vec::new(),
            index: HashMap::new(),
            next_object_id: FIRST_OBJECT_ID,
        }
    }

    pub fn name(&self) -> &FileName {
        &self.frame.owner
    }

    pub fn masters(&self) -> &[FileName] {
        &self.frame.masters
    }

    /// Frame of reference for this file's short FormIDs.
    pub fn frame(&self) -> &MasterList {
        &self.frame
    }

    /// Slot for `file`, adding it as a master if needed. Re-keys the short
    /// index when the owner's own slot moves.
    pub fn ensure_master(&mut self, file: &FileName) -> Option<usize> {
        let before = self.frame.masters.len();
        let slot = self.frame.ensure_master(file)?;
        if self.frame.masters.len() != before {
            self.reindex();
        }
        Some(slot)
    }

    /// Record instances in file order.
    pub fn record_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn record_count(&self) -> usize {
        self.entries.len()
    }

    /// Instances stored under a short FormID of this file.
    pub fn lookup_short(&self, raw: u32) -> &[RecordId] {
        self.index.get(&raw).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Instances of `form`, if this file can express it at all.
    pub fn lookup(&self, form: &FormId) -> &[RecordId] {
        match form.to_short(&self.frame) {
            Some(raw) if raw != 0 => self.lookup_short(raw),
            _ => &[],
        }
    }

    /// Whether this file can hold a record of `form` without new masters.
    pub fn can_express(&self, form: &FormId) -> bool {
        form.to_short(&self.frame).is_some()
    }

    /// Register an instance. The caller must have ensured `form` is
    /// expressible in this file.
    pub fn attach(&mut self, id: RecordId, form: FormId) {
        if let Some(raw) = form.to_short(&self.frame) {
            self.index.entry(raw).or_default().push(id);
        }
        if form.file() == Some(self.name()) {
            self.next_object_id = self.next_object_id.max(form.object_id() + 1);
        }
        self.entries.push((id, form));
    }

    /// Forget an instance.
    pub fn detach(&mut self, id: RecordId) {
        if let Some(pos) = self.entries.iter().position(|(e, _)| *e == id) {
            let (_, form) = self.entries.remove(pos);
            if let Some(raw) = form.to_short(&self.frame) {
                if let Some(ids) = self.index.get_mut(&raw) {
                    ids.retain(|e| *e != id);
                    if ids.is_empty() {
                        self.index.remove(&raw);
                    }
                }
            }
        }
    }

    /// Next unused object number defined by this file. Wraps back to
    /// [`FIRST_OBJECT_ID`] past the largest object number.
    pub fn mint_object_id(&mut self) -> u32 {
        let mut id = self.next_object_id & OBJECT_ID_MASK;
        if id < FIRST_OBJECT_ID {
            id = FIRST_OBJECT_ID;
        }
        self.next_object_id = id + 1;
        id
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (id, form) in &self.entries {
            if let Some(raw) = form.to_short(&self.frame) {
                self.index.entry(raw).or_default().push(*id);
            }
        }
    }
}
