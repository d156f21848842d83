//! Binary plugin codec.
//!
//! A plugin image is a versioned header (magic, format version, file name,
//! master list) followed by its records, encoded with `bitcode`. References
//! are stored in short form relative to the file, exactly as the file format
//! locates them; the master list grows on save to cover every reference.

use crate::collection::{Collection, CollectionError};
use crate::field::FieldMap;
use crate::formid::{FileName, FormId, MasterList};
use crate::store::RecordError;
use crate::id::{FieldIndex, FileId, RecordId, TypeTag};
use crate::value::{Slot, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a plugin image.
pub const PLUGIN_MAGIC: u32 = 0xF0A4_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("file {0:?} is not loaded")]
    UnknownFile(FileId),
    #[error("master list of {file} is full; cannot reference {reference}")]
    MasterListFull { file: FileName, reference: FormId },
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", PLUGIN_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("plugin from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Collection(#[from] CollectionError),
}

// ---------------------------------------------------------------------------
// Plugin header
// ---------------------------------------------------------------------------

/// Header prepended to every plugin image. Enables format detection and
/// version checking, and carries the frame for short FormIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHeader {
    pub magic: u32,
    pub version: u32,
    pub name: String,
    pub masters: Vec<String>,
}

impl PluginHeader {
    pub fn new(frame: &MasterList) -> Self {
        Self {
            magic: PLUGIN_MAGIC,
            version: FORMAT_VERSION,
            name: frame.owner.as_str().to_string(),
            masters: frame.masters.iter().map(|m| m.as_str().to_string()).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != PLUGIN_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    pub fn frame(&self) -> MasterList {
        MasterList::new(
            self.name.as_str(),
            self.masters.iter().map(|m| FileName::new(m.as_str())).collect(),
        )
    }
}

/// Decode a plugin image and return just its header.
///
/// bitcode has no partial decoding, so this decodes the full image.
pub fn read_plugin_header(data: &[u8]) -> Result<PluginHeader, DeserializeError> {
    let image: PluginImage = bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(image.header)
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WireSlot {
    Empty,
    Int(i64),
    Float(f32),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// Short FormID relative to the image's header.
    Ref(u32),
    Seq(Vec<WireSlot>),
    Group(Vec<(u32, WireSlot)>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRecord {
    tag: [u8; 4],
    form: u32,
    fields: Vec<(u32, WireSlot)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PluginImage {
    header: PluginHeader,
    records: Vec<WireRecord>,
}

/// Add every file `form` needs to `frame`.
fn reserve_master(form: &FormId, frame: &mut MasterList) -> Result<(), SerializeError> {
    form.to_short_for_write(frame)
        .map(|_| ())
        .ok_or_else(|| SerializeError::MasterListFull {
            file: frame.owner.clone(),
            reference: form.clone(),
        })
}

/// Encode against a frame that already holds every needed master.
fn encode_form(form: &FormId, frame: &MasterList) -> Result<u32, SerializeError> {
    form.to_short(frame).ok_or_else(|| SerializeError::MasterListFull {
        file: frame.owner.clone(),
        reference: form.clone(),
    })
}

fn encode_slot(slot: &Slot, frame: &MasterList) -> Result<WireSlot, SerializeError> {
    Ok(match slot {
        Slot::Empty => WireSlot::Empty,
        Slot::Value(Value::Int(v)) => WireSlot::Int(*v),
        Slot::Value(Value::Float(v)) => WireSlot::Float(*v),
        Slot::Value(Value::Bool(v)) => WireSlot::Bool(*v),
        Slot::Value(Value::Bytes(v)) => WireSlot::Bytes(v.clone()),
        Slot::Value(Value::Str(v)) => WireSlot::Str(v.clone()),
        Slot::Value(Value::FormId(form)) => WireSlot::Ref(encode_form(form, frame)?),
        Slot::Seq(items) => WireSlot::Seq(
            items
                .iter()
                .map(|s| encode_slot(s, frame))
                .collect::<Result<_, _>>()?,
        ),
        Slot::Group(members) => WireSlot::Group(encode_fields(members, frame)?),
    })
}

fn encode_fields(fields: &BTreeMap<FieldIndex, Slot>, frame: &MasterList) -> Result<Vec<(u32, WireSlot)>, SerializeError> {
    fields
        .iter()
        .map(|(index, slot)| Ok((index.0, encode_slot(slot, frame)?)))
        .collect()
}

fn decode_slot(slot: WireSlot, frame: &MasterList) -> Slot {
    match slot {
        WireSlot::Empty => Slot::Empty,
        WireSlot::Int(v) => Slot::Value(Value::Int(v)),
        WireSlot::Float(v) => Slot::Value(Value::Float(v)),
        WireSlot::Bool(v) => Slot::Value(Value::Bool(v)),
        WireSlot::Bytes(v) => Slot::Value(Value::Bytes(v)),
        WireSlot::Str(v) => Slot::Value(Value::Str(v)),
        WireSlot::Ref(raw) => Slot::Value(Value::FormId(FormId::from_short(raw, frame))),
        WireSlot::Seq(items) => Slot::Seq(items.into_iter().map(|s| decode_slot(s, frame)).collect()),
        WireSlot::Group(members) => Slot::Group(decode_fields(members, frame)),
    }
}

fn decode_fields(fields: Vec<(u32, WireSlot)>, frame: &MasterList) -> FieldMap {
    fields
        .into_iter()
        .map(|(index, slot)| (FieldIndex(index), decode_slot(slot, frame)))
        .collect()
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

/// Encode one file of the collection.
///
/// Deleted records are left out and dropped from memory, and the in-memory
/// edits of every written record become its new on-disk state. Masters
/// needed by references are appended to the file's master list. On error
/// the collection is unchanged.
pub fn serialize_plugin(coll: &mut Collection, file: FileId) -> Result<Vec<u8>, SerializeError> {
    let plugin = coll.file(file).ok_or(SerializeError::UnknownFile(file))?;
    let mut live = Vec::with_capacity(plugin.record_count());
    let mut deleted = Vec::new();
    for id in plugin.record_ids() {
        let Some(record) = coll.store().get_any(id) else { continue };
        if record.is_deleted() {
            deleted.push(id);
        } else {
            live.push((id, record));
        }
    }

    // Appending a master moves the owner's slot, so the frame is completed
    // before anything is encoded.
    let mut frame = plugin.frame().clone();
    for (_, record) in &live {
        reserve_master(&record.form_id, &mut frame)?;
        let mut reserved = Ok(());
        for slot in record.fields().values() {
            slot.for_each_form_id(&mut |form| {
                if reserved.is_ok() {
                    reserved = reserve_master(form, &mut frame);
                }
            });
        }
        reserved?;
    }

    let records = live
        .iter()
        .map(|(_, record)| {
            Ok(WireRecord {
                tag: record.type_tag.0,
                form: encode_form(&record.form_id, &frame)?,
                fields: encode_fields(record.fields(), &frame)?,
            })
        })
        .collect::<Result<Vec<_>, SerializeError>>()?;
    let written: Vec<RecordId> = live.iter().map(|(id, _)| *id).collect();

    let image = PluginImage {
        header: PluginHeader::new(&frame),
        records,
    };
    let bytes = bitcode::serialize(&image).map_err(|e| SerializeError::Encode(e.to_string()))?;

    if let Some(plugin) = coll.file_mut(file) {
        for master in &frame.masters {
            plugin.ensure_master(master);
        }
    }
    for id in written {
        coll.store_mut().commit(id)?;
    }
    for id in &deleted {
        coll.detach_record(crate::handle::RecordHandle::new(*id));
    }
    debug!(
        file = %frame.owner,
        records = image.records.len(),
        deleted = deleted.len(),
        bytes = bytes.len(),
        "serialized plugin"
    );
    Ok(bytes)
}

impl Collection {
    /// Decode a plugin image and append it to the end of the load order.
    /// Record types without a registered schema are kept schema-less.
    pub fn load_plugin(&mut self, data: &[u8], scan_only: bool) -> Result<FileId, DeserializeError> {
        let image: PluginImage =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        image.header.validate()?;

        let frame = image.header.frame();
        let file = self.add_file(frame.owner.clone(), frame.masters.clone(), scan_only)?;
        let count = image.records.len();
        for record in image.records {
            let tag = TypeTag(record.tag);
            if self.registry().get(tag).is_none() {
                debug!(tag = %tag, "loading record without schema");
            }
            let form = FormId::from_short(record.form, &frame);
            let fields = decode_fields(record.fields, &frame);
            self.insert_loaded(file, tag, form, fields)?;
        }
        debug!(file = %frame.owner, records = count, scan_only, "loaded plugin");
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::value::FieldValue;

    fn reload(bytes: &[u8]) -> Collection {
        let mut coll = empty_collection();
        coll.add_file("Base.esm", vec![], false).unwrap();
        coll.add_file("D.esp", vec!["Base.esm".into()], false).unwrap();
        coll.load_plugin(bytes, false).unwrap();
        coll
    }

    #[test]
    fn round_trip_preserves_fields_and_references() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("D.esp", false)]);
        let patch = coll.add_file("Patch.esp", vec!["Base.esm".into()], false).unwrap();
        let chest = container(&mut coll, files[0], 0x10, "Chest");
        let over = chest.duplicate_as_override(&mut coll, patch, false).unwrap().unwrap();
        add_item(&mut coll, over, FormId::new("D.esp", 0x900), 4);
        add_item(&mut coll, over, FormId::NULL, 1);
        let before = over.get(&coll, "items").unwrap();

        let bytes = serialize_plugin(&mut coll, patch).unwrap();
        // D.esp was appended so the reference stays expressible.
        assert_eq!(
            coll.file(patch).unwrap().masters(),
            &[FileName::new("Base.esm"), FileName::new("D.esp")]
        );

        let loaded = reload(&bytes);
        let file = *loaded.load_order().last().unwrap();
        let form = FormId::new("Base.esm", 0x10);
        let h = loaded.lookup(file, &form).unwrap();
        assert_eq!(h.get(&loaded, "items").unwrap(), before);
        assert_eq!(h.get(&loaded, "full").unwrap(), FieldValue::Value(Value::from("Chest")));
    }

    #[test]
    fn own_identity_survives_master_append() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("D.esp", false)]);
        let patch = coll.add_file("Patch.esp", vec!["Base.esm".into()], false).unwrap();
        // Encoded before the reference that forces D.esp into the masters.
        let own = container(&mut coll, patch, 0x900, "Own");
        let own_form = own.form_id(&coll).unwrap();
        let chest = container(&mut coll, files[0], 0x10, "Chest");
        let over = chest.duplicate_as_override(&mut coll, patch, false).unwrap().unwrap();
        add_item(&mut coll, over, FormId::new("D.esp", 0x800), 1);

        let bytes = serialize_plugin(&mut coll, patch).unwrap();
        let loaded = reload(&bytes);
        let file = *loaded.load_order().last().unwrap();
        let mut forms: Vec<FormId> = loaded
            .records(file)
            .into_iter()
            .map(|h| h.form_id(&loaded).unwrap())
            .collect();
        forms.sort();
        let mut expected = vec![own_form.clone(), FormId::new("Base.esm", 0x10)];
        expected.sort();
        assert_eq!(forms, expected);
        let h = loaded.lookup(file, &own_form).unwrap();
        assert_eq!(h.get(&loaded, "full").unwrap(), FieldValue::Value(Value::from("Own")));
        let chest_again = loaded.lookup(file, &FormId::new("Base.esm", 0x10)).unwrap();
        assert_eq!(
            chest_again.get(&loaded, "items").unwrap(),
            over.get(&coll, "items").unwrap()
        );
    }

    #[test]
    fn save_commits_edits() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        let chest = loaded_container(&mut coll, files[0], 0x10, "Old");
        chest.set(&mut coll, "full", "New").unwrap();
        serialize_plugin(&mut coll, files[0]).unwrap();
        assert!(!chest.is_modified(&coll).unwrap());
        chest.reset(&mut coll).unwrap();
        assert_eq!(chest.get(&coll, "full").unwrap(), FieldValue::Value(Value::from("New")));
    }

    #[test]
    fn deleted_records_are_omitted() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        let keep = container(&mut coll, files[0], 0x10, "Keep");
        let gone = container(&mut coll, files[0], 0x11, "Gone");
        gone.delete(&mut coll).unwrap();
        let bytes = serialize_plugin(&mut coll, files[0]).unwrap();
        assert_eq!(coll.records(files[0]), vec![keep]);

        let mut loaded = empty_collection();
        let file = loaded.load_plugin(&bytes, false).unwrap();
        assert_eq!(loaded.records(file).len(), 1);
        assert!(loaded.lookup(file, &FormId::new("Base.esm", 0x11)).is_none());
    }

    #[test]
    fn unknown_type_loads_without_schema() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        coll.insert_loaded(files[0], TypeTag::parse("ZZZZ").unwrap(), FormId::new("Base.esm", 1), FieldMap::new())
            .unwrap();
        let bytes = serialize_plugin(&mut coll, files[0]).unwrap();
        let mut loaded = empty_collection();
        let file = loaded.load_plugin(&bytes, true).unwrap();
        let h = loaded.records(file)[0];
        assert_eq!(h.type_tag(&loaded).unwrap(), TypeTag::parse("ZZZZ").unwrap());
        assert!(h.get(&loaded, "full").is_err());
        assert!(loaded.file(file).unwrap().scan_only);
    }

    #[test]
    fn header_validation() {
        let frame = MasterList::new("A.esm", vec![]);
        let good = PluginHeader::new(&frame);
        assert!(good.validate().is_ok());

        let bad_magic = PluginHeader {
            magic: 0xDEAD_BEEF,
            ..good.clone()
        };
        assert!(matches!(bad_magic.validate(), Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))));

        let future = PluginHeader {
            version: FORMAT_VERSION + 1,
            ..good.clone()
        };
        assert!(matches!(future.validate(), Err(DeserializeError::FutureVersion(_))));

        let past = PluginHeader { version: 0, ..good };
        assert!(matches!(past.validate(), Err(DeserializeError::UnsupportedVersion(0))));
    }

    #[test]
    fn header_is_readable() {
        let (mut coll, files) = stack(&[("Base.esm", false), ("Mod.esp", false)]);
        let bytes = serialize_plugin(&mut coll, files[1]).unwrap();
        let header = read_plugin_header(&bytes).unwrap();
        assert_eq!(header.name, "Mod.esp");
        assert_eq!(header.masters, vec!["Base.esm".to_string()]);
    }

    #[test]
    fn loading_same_file_twice_fails() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        let bytes = serialize_plugin(&mut coll, files[0]).unwrap();
        assert!(matches!(
            coll.load_plugin(&bytes, false),
            Err(DeserializeError::Collection(CollectionError::DuplicateFile(_)))
        ));
    }

    #[test]
    fn empty_data_returns_decode_error() {
        let mut coll = empty_collection();
        assert!(matches!(coll.load_plugin(&[], false), Err(DeserializeError::Decode(_))));
    }

    #[test]
    fn truncated_data_returns_error() {
        let (mut coll, files) = stack(&[("Base.esm", false)]);
        container(&mut coll, files[0], 0x10, "Chest");
        let mut bytes = serialize_plugin(&mut coll, files[0]).unwrap();
        bytes.truncate(4);
        let mut fresh = empty_collection();
        assert!(fresh.load_plugin(&bytes, false).is_err());
    }
}
