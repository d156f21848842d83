//! Patch building: merge every file's changes to a record into one override
//! written to a dedicated patch file.
//!
//! For each identity the override starts as a copy of the winner. Then,
//! oldest file first, each instance's changes against the version its file
//! was authored on (its nearest instance in a master) are replayed on top,
//! so every attribute ends with the value from the last file that changed
//! it. The record type's merge filter runs last, against the patch file.

use crate::collection::{Collection, CollectionError};
use crate::diagnostic::Diagnostic;
use crate::formid::FormId;
use crate::handle::RecordHandle;
use crate::id::{FileId, TypeTag};
use crate::merge::merge_filter;
use crate::resolver::{self, ResolveError};
use tracing::debug;

/// Summary of a patch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    pub records_written: usize,
    pub entries_removed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl PatchReport {
    fn absorb(&mut self, other: PatchReport) {
        self.records_written += other.records_written;
        self.entries_removed += other.entries_removed;
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Writes merged overrides into one patch file of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patcher {
    patch: FileId,
}

impl Patcher {
    pub fn new(coll: &Collection, patch: FileId) -> Result<Self, CollectionError> {
        if coll.file(patch).is_none() {
            return Err(CollectionError::UnknownFile(patch));
        }
        Ok(Self { patch })
    }

    pub fn patch_file(&self) -> FileId {
        self.patch
    }

    /// Authoritative instances of `form` outside the patch file.
    fn sources(&self, coll: &Collection, form: &FormId) -> Result<Vec<RecordHandle>, ResolveError> {
        let mut chain = resolver::override_chain(coll, form, false)?;
        chain.retain(|h| h.file(coll).is_ok_and(|f| f != self.patch));
        Ok(chain)
    }

    /// Merge `attributes` (every diffable attribute when empty) of `form`
    /// into the patch file.
    pub fn merge_record(
        &self,
        coll: &mut Collection,
        form: &FormId,
        attributes: &[&str],
    ) -> Result<PatchReport, ResolveError> {
        let sources = self.sources(coll, form)?;
        let Some(&winner) = sources.last() else {
            return Ok(PatchReport::default());
        };
        let schema = winner.schema(coll)?;
        let attributes: Vec<&str> = if attributes.is_empty() {
            schema.diff_attributes()
        } else {
            attributes.to_vec()
        };

        let mut merged = coll.store().fields(winner.id())?.clone();
        for &source in &sources {
            let fields = coll.store().fields(source.id())?;
            let parent = resolver::previous_in_masters(coll, source)?;
            for index in resolver::changed_against(coll, source, parent, &attributes)? {
                match fields.get(&index) {
                    Some(slot) => merged.insert(index, slot.clone()),
                    None => merged.remove(&index),
                };
            }
        }

        let target = match coll.lookup(self.patch, form) {
            Some(existing) => existing,
            None => winner
                .duplicate_as_override(coll, self.patch, true)?
                .ok_or(CollectionError::UnknownFile(self.patch))?,
        };
        coll.store_mut().replace_fields(target.id(), merged)?;

        let diagnostics = merge_filter(coll, target, self.patch)?;
        debug!(form = %form, sources = sources.len(), "merged record into patch");
        Ok(PatchReport {
            records_written: 1,
            entries_removed: diagnostics.len(),
            diagnostics,
        })
    }

    /// Merge every conflicting identity whose records are of one of `types`.
    pub fn build(&self, coll: &mut Collection, types: &[TypeTag]) -> Result<PatchReport, ResolveError> {
        let mut report = PatchReport::default();
        for form in coll.identities() {
            let sources = self.sources(coll, &form)?;
            let Some(&winner) = sources.last() else { continue };
            if sources.len() < 2 || !types.contains(&winner.type_tag(coll)?) {
                continue;
            }
            report.absorb(self.merge_record(coll, &form, &[])?);
        }
        debug!(
            records = report.records_written,
            removed = report.entries_removed,
            "patch build finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::value::{FieldValue, Value};

    #[test]
    fn last_change_wins_per_attribute() {
        let mut coll = empty_collection();
        let base_file = coll.add_file("Base.esm", vec![], false).unwrap();
        let names = coll.add_file("Names.esp", vec!["Base.esm".into()], false).unwrap();
        let flags_file = coll.add_file("Flags.esp", vec!["Base.esm".into()], false).unwrap();
        let patch = coll.add_file("Patch.esp", vec![], false).unwrap();
        let base = loaded_container(&mut coll, base_file, 0x10, "Old");
        override_full(&mut coll, base, names, "Renamed");
        let flags = base.duplicate_as_override(&mut coll, flags_file, false).unwrap().unwrap();
        flags.set_flag(&mut coll, "respawns", true).unwrap();

        let patcher = Patcher::new(&coll, patch).unwrap();
        let form = base.form_id(&coll).unwrap();
        let report = patcher.merge_record(&mut coll, &form, &[]).unwrap();
        assert_eq!(report.records_written, 1);

        let patched = coll.lookup(patch, &form).unwrap();
        // The winner alone would have lost the rename.
        assert_eq!(patched.get(&coll, "full").unwrap(), FieldValue::Value(Value::from("Renamed")));
        assert!(patched.flag(&coll, "respawns").unwrap());
        assert!(patched.is_winning(&coll, false).unwrap());
    }

    #[test]
    fn merge_reuses_existing_override() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("Mod.esp", false), ("Patch.esp", false)]);
        let base = loaded_container(&mut coll, files[0], 0x10, "Old");
        override_full(&mut coll, base, files[1], "New");
        let patcher = Patcher::new(&coll, files[2]).unwrap();
        let form = base.form_id(&coll).unwrap();
        patcher.merge_record(&mut coll, &form, &["full"]).unwrap();
        patcher.merge_record(&mut coll, &form, &["full"]).unwrap();
        assert_eq!(coll.records(files[2]).len(), 1);
    }

    #[test]
    fn build_covers_conflicting_types_only() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("Mod.esp", false), ("Patch.esp", false)]);
        let chest = loaded_container(&mut coll, files[0], 0x10, "Old");
        override_full(&mut coll, chest, files[1], "New");
        loaded_container(&mut coll, files[0], 0x11, "Alone");
        let g = global(&mut coll, files[0], 0x30);
        g.duplicate_as_override(&mut coll, files[1], false).unwrap();

        let patcher = Patcher::new(&coll, files[2]).unwrap();
        let report = patcher.build(&mut coll, &[container_tag()]).unwrap();
        assert_eq!(report.records_written, 1);
        assert_eq!(coll.records(files[2]).len(), 1);
    }

    #[test]
    fn build_strips_unresolvable_entries() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("D.esp", false)]);
        let patch = coll.add_file("Patch.esp", vec!["Base.esm".into()], false).unwrap();
        let chest = loaded_container(&mut coll, files[0], 0x10, "Chest");
        let over = chest.duplicate_as_override(&mut coll, files[1], false).unwrap().unwrap();
        add_item(&mut coll, over, FormId::new("Base.esm", 0x40), 1);
        add_item(&mut coll, over, FormId::new("D.esp", 0x900), 1);

        let report = Patcher::new(&coll, patch).unwrap().build(&mut coll, &[container_tag()]).unwrap();
        assert_eq!(report.entries_removed, 1);
        let patched = coll.lookup(patch, &chest.form_id(&coll).unwrap()).unwrap();
        assert_eq!(patched.len(&coll, "items", &[]).unwrap(), 1);
    }

    #[test]
    fn unknown_patch_file_rejected() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        coll.remove_file(files[0]).unwrap();
        assert!(Patcher::new(&coll, files[0]).is_err());
    }
}
