//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::collection::{Collection, CollectionConfig};
use crate::field::{FieldDescriptor, FieldMap, GroupLayout, Shape, Step};
use crate::formid::{FileName, FormId};
use crate::handle::RecordHandle;
use crate::id::{FieldIndex, FileId, TypeTag};
use crate::masked::{MaskedView, VariantFamily};
use crate::merge::MergeFilter;
use crate::registry::{SchemaRegistry, SchemaRegistryBuilder};
use crate::schema::RecordSchema;
use crate::value::{Primitive, Value};
use std::sync::Arc;

// ===========================================================================
// Type tags
// ===========================================================================

pub fn container_tag() -> TypeTag {
    TypeTag(*b"CONT")
}
pub fn cell_tag() -> TypeTag {
    TypeTag(*b"CELL")
}
pub fn reference_tag() -> TypeTag {
    TypeTag(*b"REFR")
}
pub fn global_tag() -> TypeTag {
    TypeTag(*b"GLOB")
}
pub fn leveled_tag() -> TypeTag {
    TypeTag(*b"LVLI")
}
pub fn region_tag() -> TypeTag {
    TypeTag(*b"REGN")
}

// ===========================================================================
// Sample schema catalog
// ===========================================================================

/// Container: names, an opaque model blob, an item list whose entries are
/// filtered on merge, and a packed flags byte with a flag, its inverse and a
/// three-way size family.
pub fn container_schema() -> RecordSchema {
    let entry = GroupLayout::new(
        "ContainerItem",
        vec![
            FieldDescriptor::scalar("item", 0, Primitive::FormId),
            FieldDescriptor::scalar("count", 1, Primitive::I32),
        ],
    );
    RecordSchema::new(container_tag(), "Container")
        .with_field(FieldDescriptor::scalar("editor_id", 0, Primitive::IDENT))
        .with_field(FieldDescriptor::scalar("full", 1, Primitive::TEXT))
        .with_field(FieldDescriptor::scalar("model", 2, Primitive::FixedBytes(16)))
        .with_field(FieldDescriptor::list("items", 3, Shape::Group(entry)))
        .with_field(FieldDescriptor::scalar("flags", 4, Primitive::U8))
        .with_flag(MaskedView::flag("respawns", FieldIndex(4), 0x02))
        .with_inverted_flag("no_respawn", "respawns")
        .with_family(VariantFamily::new(
            "size",
            FieldIndex(4),
            0x30,
            &[("none", 0x00), ("small", 0x10), ("large", 0x20)],
        ))
        .with_attribute_group("names", &["editor_id", "full"])
        .with_merge_filter(MergeFilter::InvalidEntries {
            list: FieldIndex(3),
            reference: vec![Step::Member(FieldIndex(0))],
        })
}

pub fn cell_schema() -> RecordSchema {
    RecordSchema::new(cell_tag(), "Cell")
        .with_field(FieldDescriptor::scalar("editor_id", 0, Primitive::IDENT))
        .with_field(FieldDescriptor::scalar("full", 1, Primitive::TEXT))
        .with_field(FieldDescriptor::scalar("flags", 2, Primitive::U16))
        .with_flag(MaskedView::flag("interior", FieldIndex(2), 0x01))
}

/// Placed reference: contained by the cell named in `cell`.
pub fn reference_schema() -> RecordSchema {
    RecordSchema::new(reference_tag(), "Reference")
        .with_field(FieldDescriptor::scalar("base", 0, Primitive::FormId))
        .with_field(FieldDescriptor::scalar("cell", 1, Primitive::FormId))
        .with_field(FieldDescriptor::array("position", 2, 3, Primitive::Float32))
        .with_field(FieldDescriptor::scalar("scale", 3, Primitive::Float32))
        .with_field(FieldDescriptor::scalar("legacy", 9, Primitive::U32).unknown())
        .with_parent_field(1)
}

pub fn global_schema() -> RecordSchema {
    RecordSchema::new(global_tag(), "Global")
        .with_field(FieldDescriptor::scalar("editor_id", 0, Primitive::IDENT))
        .with_field(FieldDescriptor::scalar("value", 1, Primitive::FormIdOrFloat))
}

pub fn leveled_schema() -> RecordSchema {
    let entry = GroupLayout::new(
        "LeveledEntry",
        vec![
            FieldDescriptor::scalar("level", 0, Primitive::I16),
            FieldDescriptor::scalar("reference", 1, Primitive::FormId),
            FieldDescriptor::scalar("count", 2, Primitive::I16),
        ],
    );
    RecordSchema::new(leveled_tag(), "LeveledItem")
        .with_field(FieldDescriptor::list("entries", 0, Shape::Group(entry)))
        .with_field(FieldDescriptor::scalar("chance_none", 1, Primitive::U8))
        .with_merge_filter(MergeFilter::InvalidEntries {
            list: FieldIndex(0),
            reference: vec![Step::Member(FieldIndex(1))],
        })
}

/// Region: three levels of nested integer lists.
pub fn region_schema() -> RecordSchema {
    let cube = Shape::list(Shape::list(Shape::list(Shape::Scalar(Primitive::I32))));
    RecordSchema::new(region_tag(), "Region")
        .with_field(FieldDescriptor::scalar("editor_id", 0, Primitive::IDENT))
        .with_field(FieldDescriptor::new("areas", 1, cube))
}

pub fn sample_registry() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistryBuilder::new();
    for schema in [
        container_schema(),
        cell_schema(),
        reference_schema(),
        global_schema(),
        leveled_schema(),
        region_schema(),
    ] {
        builder.register_schema(schema);
    }
    Arc::new(builder.build().unwrap())
}

// ===========================================================================
// Collections
// ===========================================================================

pub fn empty_collection() -> Collection {
    Collection::new(sample_registry(), CollectionConfig::default())
}

/// A collection with `files` in load order. Each file lists every earlier
/// file as a master.
pub fn stack(files: &[(&str, bool)]) -> (Collection, Vec<FileId>) {
    stack_with_config(files, CollectionConfig::default())
}

pub fn stack_with_config(files: &[(&str, bool)], config: CollectionConfig) -> (Collection, Vec<FileId>) {
    let mut coll = Collection::new(sample_registry(), config);
    let mut ids = Vec::new();
    let mut masters: Vec<FileName> = Vec::new();
    for (name, scan_only) in files {
        ids.push(coll.add_file(*name, masters.clone(), *scan_only).unwrap());
        masters.push(FileName::new(*name));
    }
    (coll, ids)
}

// ===========================================================================
// Records
// ===========================================================================

/// Field storage for `tag` with the named scalar fields set.
pub fn fields_of(coll: &Collection, tag: TypeTag, values: &[(&str, Value)]) -> FieldMap {
    let schema = coll.registry().get(tag).unwrap();
    let mut fields = FieldMap::new();
    for (name, value) in values {
        let field = schema.field_by_name(name).unwrap();
        field.write_at(&mut fields, &[], value.clone()).unwrap();
    }
    fields
}

/// Identity defined by `file`.
pub fn own_form(coll: &Collection, file: FileId, object_id: u32) -> FormId {
    FormId::new(coll.file(file).unwrap().name().clone(), object_id)
}

fn container_fields(coll: &Collection, object_id: u32, full: &str) -> FieldMap {
    fields_of(
        coll,
        container_tag(),
        &[
            ("editor_id", Value::from(format!("Cont{object_id:06X}").as_str())),
            ("full", Value::from(full)),
        ],
    )
}

/// A container created in memory, defined by `file`.
pub fn container(coll: &mut Collection, file: FileId, object_id: u32, full: &str) -> RecordHandle {
    let fields = container_fields(coll, object_id, full);
    let form = own_form(coll, file, object_id);
    coll.insert_created(file, container_tag(), form, fields).unwrap()
}

/// A container as read from disk, defined by `file`.
pub fn loaded_container(coll: &mut Collection, file: FileId, object_id: u32, full: &str) -> RecordHandle {
    let fields = container_fields(coll, object_id, full);
    let form = own_form(coll, file, object_id);
    coll.insert_loaded(file, container_tag(), form, fields).unwrap()
}

/// Override `base` in `file` with a new `full` name.
pub fn override_full(coll: &mut Collection, base: RecordHandle, file: FileId, full: &str) -> RecordHandle {
    let copy = base.duplicate_as_override(coll, file, false).unwrap().unwrap();
    copy.set(coll, "full", full).unwrap();
    copy
}

/// Append an entry to a container's item list.
pub fn add_item(coll: &mut Collection, chest: RecordHandle, item: FormId, count: i64) -> usize {
    let i = chest.grow(coll, "items", &[]).unwrap();
    chest
        .set_at(coll, "items", &[Step::Index(i), Step::Member(FieldIndex(0))], item)
        .unwrap();
    chest
        .set_at(coll, "items", &[Step::Index(i), Step::Member(FieldIndex(1))], count)
        .unwrap();
    i
}

pub fn cell(coll: &mut Collection, file: FileId, object_id: u32) -> RecordHandle {
    let fields = fields_of(
        coll,
        cell_tag(),
        &[("editor_id", Value::from(format!("Cell{object_id:06X}").as_str()))],
    );
    let form = own_form(coll, file, object_id);
    coll.insert_loaded(file, cell_tag(), form, fields).unwrap()
}

/// A placed reference inside `parent`.
pub fn reference(coll: &mut Collection, file: FileId, object_id: u32, parent: FormId) -> RecordHandle {
    let fields = fields_of(
        coll,
        reference_tag(),
        &[("cell", Value::FormId(parent)), ("scale", Value::Float(1.0))],
    );
    let form = own_form(coll, file, object_id);
    coll.insert_loaded(file, reference_tag(), form, fields).unwrap()
}

pub fn global(coll: &mut Collection, file: FileId, object_id: u32) -> RecordHandle {
    let fields = fields_of(
        coll,
        global_tag(),
        &[
            ("editor_id", Value::from(format!("Glob{object_id:06X}").as_str())),
            ("value", Value::Float(1.0)),
        ],
    );
    let form = own_form(coll, file, object_id);
    coll.insert_loaded(file, global_tag(), form, fields).unwrap()
}
