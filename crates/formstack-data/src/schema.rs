//! Serde data file structs for schema catalogs and load orders.
//!
//! These structs define the on-disk format of a data directory. They are
//! deserialized from RON, JSON, or TOML files and then resolved into core
//! types by the catalog builder and the loader. Cross-references (layouts,
//! fields, flags) are by name.

use serde::Deserialize;

// ===========================================================================
// Load order
// ===========================================================================

/// One file of the load order.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntryData {
    pub name: String,
    /// Masters of a file created empty. Ignored when `plugin` is given; the
    /// plugin header carries its own.
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub scan_only: bool,
    /// Plugin image to load, relative to the data directory.
    #[serde(default)]
    pub plugin: Option<String>,
}

/// TOML wrapper: `[[files]]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlLoadOrder {
    pub files: Vec<PluginEntryData>,
}

// ===========================================================================
// Schema catalog
// ===========================================================================

/// A schema catalog: reusable group layouts plus record types.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub layouts: Vec<LayoutData>,
    #[serde(default)]
    pub records: Vec<RecordTypeData>,
}

/// A named group layout. May use layouts declared before it.
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutData {
    pub name: String,
    pub fields: Vec<FieldData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldData {
    pub name: String,
    pub index: u32,
    pub shape: ShapeData,
    /// Undecoded data kept only for round trips.
    #[serde(default)]
    pub unknown: bool,
}

/// Field shape. Nested lists are written as nested `List`s.
#[derive(Debug, Clone, Deserialize)]
pub enum ShapeData {
    Scalar(PrimitiveData),
    Array { len: usize, element: Box<ShapeData> },
    List(Box<ShapeData>),
    /// A layout from the catalog, by name.
    Group(String),
}

/// Scalar storage type.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveData {
    Bool,
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    I64,
    F32,
    /// Free text.
    Text,
    /// Identifier text, compared case-insensitively.
    Ident,
    /// Text capped at a byte length.
    FixedText(usize),
    /// Opaque payload of a fixed byte length.
    Bytes(usize),
    FormId,
    FormIdOrInt,
    FormIdOrFloat,
    FormIdOrString,
}

/// A record type declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordTypeData {
    /// Four-character type tag.
    pub tag: String,
    pub name: String,
    pub fields: Vec<FieldData>,
    #[serde(default)]
    pub flags: Vec<FlagData>,
    #[serde(default)]
    pub inverted: Vec<InvertedFlagData>,
    #[serde(default)]
    pub families: Vec<FamilyData>,
    #[serde(default)]
    pub groups: Vec<AttributeGroupData>,
    /// Field naming the containing record.
    #[serde(default)]
    pub parent_field: Option<String>,
    #[serde(default)]
    pub merge_filter: Option<MergeFilterData>,
}

/// A single-bit (or multi-bit) boolean view over an integer field.
#[derive(Debug, Clone, Deserialize)]
pub struct FlagData {
    pub name: String,
    pub field: String,
    pub bits: u64,
}

/// The complement of a declared flag.
#[derive(Debug, Clone, Deserialize)]
pub struct InvertedFlagData {
    pub name: String,
    pub of: String,
}

/// Mutually exclusive values under one mask.
#[derive(Debug, Clone, Deserialize)]
pub struct FamilyData {
    pub name: String,
    pub field: String,
    pub mask: u64,
    pub variants: Vec<VariantData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantData {
    pub name: String,
    pub value: u64,
}

/// Attributes compared and reported together.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeGroupData {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub enum MergeFilterData {
    /// Drop entries of the list field `list` whose reference (reached from
    /// the entry by `reference`) is not valid in the target file.
    InvalidEntries {
        list: String,
        #[serde(default)]
        reference: Vec<StepData>,
    },
    All(Vec<MergeFilterData>),
}

/// One step below a list entry: an element index or a group member name.
#[derive(Debug, Clone, Deserialize)]
pub enum StepData {
    Index(usize),
    Member(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_entry_defaults() {
        let entry: PluginEntryData = ron::from_str(r#"(name: "Skyrim.esm")"#).unwrap();
        assert!(entry.masters.is_empty());
        assert!(!entry.scan_only);
        assert!(entry.plugin.is_none());
    }

    #[test]
    fn catalog_from_ron() {
        let catalog: CatalogData = ron::from_str(
            r#"(
                layouts: [
                    (name: "Entry", fields: [
                        (name: "item", index: 0, shape: Scalar(form_id)),
                        (name: "count", index: 1, shape: Scalar(i32)),
                    ]),
                ],
                records: [
                    (
                        tag: "CONT",
                        name: "Container",
                        fields: [
                            (name: "items", index: 3, shape: List(Group("Entry"))),
                            (name: "flags", index: 4, shape: Scalar(u8)),
                            (name: "model", index: 5, shape: Scalar(bytes(16)), unknown: true),
                        ],
                        flags: [(name: "respawns", field: "flags", bits: 2)],
                        merge_filter: Some(InvalidEntries(list: "items", reference: [Member("item")])),
                    ),
                ],
            )"#,
        )
        .unwrap();
        assert_eq!(catalog.layouts.len(), 1);
        let cont = &catalog.records[0];
        assert_eq!(cont.fields.len(), 3);
        assert!(cont.fields[2].unknown);
        assert!(matches!(cont.fields[0].shape, ShapeData::List(_)));
        assert!(matches!(cont.merge_filter, Some(MergeFilterData::InvalidEntries { .. })));
    }

    #[test]
    fn catalog_from_json() {
        let catalog: CatalogData = serde_json::from_str(
            r#"{
                "records": [{
                    "tag": "GLOB",
                    "name": "Global",
                    "fields": [
                        {"name": "editor_id", "index": 0, "shape": {"Scalar": "ident"}},
                        {"name": "value", "index": 1, "shape": {"Scalar": "form_id_or_float"}}
                    ]
                }]
            }"#,
        )
        .unwrap();
        assert!(catalog.layouts.is_empty());
        assert!(matches!(
            catalog.records[0].fields[1].shape,
            ShapeData::Scalar(PrimitiveData::FormIdOrFloat)
        ));
    }
}
