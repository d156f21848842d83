//! The file/collection context: the ordered load order, the plugin files in
//! it, the schema registry and the record store. Every engine operation
//! takes a `Collection` explicitly; there is no ambient "current file".

use crate::field::{FieldError, FieldMap};
use crate::formid::{FileName, FormId};
use crate::handle::RecordHandle;
use crate::id::{FileId, TypeTag};
use crate::plugin::PluginFile;
use crate::registry::SchemaRegistry;
use crate::schema::RecordSchema;
use crate::store::{PhysicalRecord, RecordError, RecordStore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Default ceiling on how many instances of one identity may exist across
/// the load order (one per load-order slot).
pub const DEFAULT_MAX_HISTORY: usize = 255;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Hard ceiling on override chain length. Exceeding it is fatal.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from managing the file list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("file {0} is already loaded")]
    DuplicateFile(FileName),
    #[error("file {0:?} is not loaded")]
    UnknownFile(FileId),
    #[error("master list of {0} is full")]
    MasterListFull(FileName),
    #[error("{0} would be stored as the null identity")]
    ReservedFormId(FormId),
    #[error(transparent)]
    Record(#[from] RecordError),
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Collection {
    registry: Arc<SchemaRegistry>,
    config: CollectionConfig,
    files: SlotMap<FileId, PluginFile>,
    load_order: Vec<FileId>,
    store: RecordStore,
}

impl Collection {
    pub fn new(registry: Arc<SchemaRegistry>, config: CollectionConfig) -> Self {
        Self {
            registry,
            config,
            files: SlotMap::with_key(),
            load_order: Vec::new(),
            store: RecordStore::new(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    // -- Files --

    /// Append an empty file to the end of the load order.
    pub fn add_file(
        &mut self,
        name: impl Into<FileName>,
        masters: Vec<FileName>,
        scan_only: bool,
    ) -> Result<FileId, CollectionError> {
        let name = name.into();
        if self.file_by_name(&name).is_some() {
            return Err(CollectionError::DuplicateFile(name));
        }
        debug!(file = %name, masters = masters.len(), scan_only, "adding file to load order");
        let id = self.files.insert(PluginFile::new(name, masters, scan_only));
        self.load_order.push(id);
        Ok(id)
    }

    /// Unload a file and every record instance it holds.
    pub fn remove_file(&mut self, file: FileId) -> Result<PluginFile, CollectionError> {
        let plugin = self.files.remove(file).ok_or(CollectionError::UnknownFile(file))?;
        for id in plugin.record_ids() {
            self.store.remove(id);
        }
        self.load_order.retain(|f| *f != file);
        debug!(file = %plugin.name(), "removed file from load order");
        Ok(plugin)
    }

    pub fn file(&self, file: FileId) -> Option<&PluginFile> {
        self.files.get(file)
    }

    pub fn file_mut(&mut self, file: FileId) -> Option<&mut PluginFile> {
        self.files.get_mut(file)
    }

    pub fn file_by_name(&self, name: &FileName) -> Option<FileId> {
        self.load_order
            .iter()
            .copied()
            .find(|f| self.files.get(*f).is_some_and(|p| p.name() == name))
    }

    /// Files in load order, earliest first.
    pub fn load_order(&self) -> &[FileId] {
        &self.load_order
    }

    /// Load-order position of a file.
    pub fn position(&self, file: FileId) -> Option<usize> {
        self.load_order.iter().position(|f| *f == file)
    }

    // -- Records --

    /// Add a record instance read from disk to `file`.
    pub fn insert_loaded(
        &mut self,
        file: FileId,
        type_tag: TypeTag,
        form_id: FormId,
        fields: FieldMap,
    ) -> Result<RecordHandle, CollectionError> {
        self.insert(file, PhysicalRecord::loaded(file, type_tag, form_id, fields))
    }

    /// Add a record instance created in memory to `file`. The defining file
    /// of `form_id` becomes a master of `file` if it is not one already.
    pub fn insert_created(
        &mut self,
        file: FileId,
        type_tag: TypeTag,
        form_id: FormId,
        fields: FieldMap,
    ) -> Result<RecordHandle, CollectionError> {
        self.insert(file, PhysicalRecord::created(file, type_tag, form_id, fields))
    }

    fn insert(&mut self, file: FileId, record: PhysicalRecord) -> Result<RecordHandle, CollectionError> {
        let plugin = self.files.get_mut(file).ok_or(CollectionError::UnknownFile(file))?;
        if let Some(defining) = record.form_id.file() {
            plugin
                .ensure_master(defining)
                .ok_or_else(|| CollectionError::MasterListFull(plugin.name().clone()))?;
        }
        // Short form 0 reads back as NULL.
        if !record.form_id.is_null() && record.form_id.to_short(plugin.frame()) == Some(0) {
            return Err(CollectionError::ReservedFormId(record.form_id));
        }
        let form = record.form_id.clone();
        let id = self.store.insert(record);
        plugin.attach(id, form);
        Ok(RecordHandle::new(id))
    }

    /// Drop a record instance from memory and from its file's index.
    pub(crate) fn detach_record(&mut self, handle: RecordHandle) {
        if let Some(record) = self.store.remove(handle.id()) {
            if let Some(plugin) = self.files.get_mut(record.file) {
                plugin.detach(handle.id());
            }
        }
    }

    /// Live instance of `form` held by `file`.
    pub fn lookup(&self, file: FileId, form: &FormId) -> Option<RecordHandle> {
        self.instances(file, form).next()
    }

    /// Every live instance of `form` held by `file`. A well-formed file
    /// holds at most one.
    pub fn instances<'a>(&'a self, file: FileId, form: &FormId) -> impl Iterator<Item = RecordHandle> + use<'a> {
        let ids = self.files.get(file).map(|p| p.lookup(form)).unwrap_or(&[]);
        ids.iter()
            .copied()
            .filter(move |id| self.store.is_live(*id))
            .map(RecordHandle::new)
    }

    /// Live record instances of `file`, in file order.
    pub fn records(&self, file: FileId) -> Vec<RecordHandle> {
        self.files
            .get(file)
            .map(|p| {
                p.record_ids()
                    .filter(|id| self.store.is_live(*id))
                    .map(RecordHandle::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every distinct identity held by a live record, in sorted order.
    /// Computed on demand.
    pub fn identities(&self) -> Vec<FormId> {
        let mut forms = BTreeSet::new();
        for file in &self.load_order {
            for handle in self.records(*file) {
                if let Ok(record) = self.store.get(handle.id()) {
                    forms.insert(record.form_id.clone());
                }
            }
        }
        forms.into_iter().collect()
    }

    /// A fresh identity defined by `file`.
    pub fn mint_form_id(&mut self, file: FileId) -> Result<FormId, CollectionError> {
        let plugin = self.files.get_mut(file).ok_or(CollectionError::UnknownFile(file))?;
        let object_id = plugin.mint_object_id();
        Ok(FormId::new(plugin.name().clone(), object_id))
    }

    /// Schema for the record type of `handle`.
    pub fn schema_of(&self, handle: RecordHandle) -> Result<&Arc<RecordSchema>, FieldError> {
        let tag = self.store.get(handle.id())?.type_tag;
        self.registry
            .get(tag)
            .ok_or_else(|| FieldError::NoSchema(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistryBuilder;

    fn empty() -> Collection {
        let registry = SchemaRegistryBuilder::new().build().unwrap();
        Collection::new(Arc::new(registry), CollectionConfig::default())
    }

    fn misc() -> TypeTag {
        TypeTag::parse("MISC").unwrap()
    }

    #[test]
    fn files_keep_load_order() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let b = coll.add_file("B.esp", vec!["A.esm".into()], false).unwrap();
        assert_eq!(coll.load_order(), &[a, b]);
        assert_eq!(coll.position(b), Some(1));
        assert_eq!(coll.file_by_name(&"b.ESP".into()), Some(b));
    }

    #[test]
    fn duplicate_file_rejected() {
        let mut coll = empty();
        coll.add_file("A.esm", vec![], false).unwrap();
        let err = coll.add_file("a.esm", vec![], false).unwrap_err();
        assert_eq!(err, CollectionError::DuplicateFile("a.esm".into()));
    }

    #[test]
    fn insert_and_lookup() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let form = FormId::new("A.esm", 0x10);
        let h = coll.insert_loaded(a, misc(), form.clone(), FieldMap::new()).unwrap();
        assert_eq!(coll.lookup(a, &form), Some(h));
        assert_eq!(coll.records(a), vec![h]);
        assert_eq!(coll.identities(), vec![form]);
    }

    #[test]
    fn insert_created_adds_master() {
        let mut coll = empty();
        coll.add_file("A.esm", vec![], false).unwrap();
        let b = coll.add_file("B.esp", vec![], false).unwrap();
        coll.insert_created(b, misc(), FormId::new("A.esm", 1), FieldMap::new())
            .unwrap();
        assert_eq!(coll.file(b).unwrap().masters(), &["A.esm".into()]);
    }

    #[test]
    fn object_zero_in_first_slot_rejected() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let b = coll.add_file("B.esp", vec!["A.esm".into()], false).unwrap();
        let own = FormId::new("A.esm", 0);
        let err = coll.insert_created(a, misc(), own.clone(), FieldMap::new()).unwrap_err();
        assert_eq!(err, CollectionError::ReservedFormId(own.clone()));
        let err = coll.insert_created(b, misc(), own.clone(), FieldMap::new()).unwrap_err();
        assert_eq!(err, CollectionError::ReservedFormId(own));
        assert!(coll.records(a).is_empty());
        assert!(coll.records(b).is_empty());

        // B.esp owns slot 1, so its object 0 is not raw 0.
        coll.insert_created(b, misc(), FormId::new("B.esp", 0), FieldMap::new())
            .unwrap();
    }

    #[test]
    fn remove_file_unloads_records() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let h = coll
            .insert_loaded(a, misc(), FormId::new("A.esm", 1), FieldMap::new())
            .unwrap();
        coll.remove_file(a).unwrap();
        assert!(!coll.store().is_live(h.id()));
        assert!(coll.load_order().is_empty());
        assert_eq!(coll.remove_file(a).unwrap_err(), CollectionError::UnknownFile(a));
    }

    #[test]
    fn mint_form_id_is_unique() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let x = coll.mint_form_id(a).unwrap();
        let y = coll.mint_form_id(a).unwrap();
        assert_ne!(x, y);
        assert_eq!(x.file(), Some(&"A.esm".into()));
    }

    #[test]
    fn schema_of_unknown_type_is_error() {
        let mut coll = empty();
        let a = coll.add_file("A.esm", vec![], false).unwrap();
        let h = coll
            .insert_loaded(a, misc(), FormId::new("A.esm", 1), FieldMap::new())
            .unwrap();
        assert!(matches!(coll.schema_of(h), Err(FieldError::NoSchema(_))));
    }

    #[test]
    fn config_defaults() {
        let config = CollectionConfig::default();
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
    }
}
