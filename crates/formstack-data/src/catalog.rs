//! Catalog resolution: turns schema catalog data into registered record
//! schemas, resolving layout and field names along the way.

use formstack_core::field::{FieldDescriptor, GroupLayout, Shape, Step};
use formstack_core::id::{FieldIndex, TypeTag};
use formstack_core::masked::{MaskedView, VariantFamily};
use formstack_core::merge::MergeFilter;
use formstack_core::registry::{SchemaRegistry, SchemaRegistryBuilder};
use formstack_core::schema::RecordSchema;
use formstack_core::value::{Primitive, StringCase};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::loader::{DataLoadError, check_duplicate, deserialize_file, resolve_name};
use crate::schema::*;

// ===========================================================================
// Shapes
// ===========================================================================

fn primitive(data: PrimitiveData) -> Primitive {
    match data {
        PrimitiveData::Bool => Primitive::Bool,
        PrimitiveData::U8 => Primitive::U8,
        PrimitiveData::U16 => Primitive::U16,
        PrimitiveData::U32 => Primitive::U32,
        PrimitiveData::I8 => Primitive::I8,
        PrimitiveData::I16 => Primitive::I16,
        PrimitiveData::I32 => Primitive::I32,
        PrimitiveData::I64 => Primitive::I64,
        PrimitiveData::F32 => Primitive::Float32,
        PrimitiveData::Text => Primitive::TEXT,
        PrimitiveData::Ident => Primitive::IDENT,
        PrimitiveData::FixedText(len) => Primitive::String {
            fixed: Some(len),
            case: StringCase::Sensitive,
        },
        PrimitiveData::Bytes(len) => Primitive::FixedBytes(len),
        PrimitiveData::FormId => Primitive::FormId,
        PrimitiveData::FormIdOrInt => Primitive::FormIdOrInt,
        PrimitiveData::FormIdOrFloat => Primitive::FormIdOrFloat,
        PrimitiveData::FormIdOrString => Primitive::FormIdOrString,
    }
}

fn shape(
    data: &ShapeData,
    layouts: &HashMap<String, Arc<GroupLayout>>,
    path: &Path,
) -> Result<Shape, DataLoadError> {
    Ok(match data {
        ShapeData::Scalar(p) => Shape::Scalar(primitive(*p)),
        ShapeData::Array { len, element } => Shape::array(*len, shape(element, layouts, path)?),
        ShapeData::List(element) => Shape::list(shape(element, layouts, path)?),
        ShapeData::Group(name) => Shape::Group(resolve_name(layouts, name, path, "layout")?.clone()),
    })
}

fn fields(
    data: &[FieldData],
    layouts: &HashMap<String, Arc<GroupLayout>>,
    path: &Path,
) -> Result<Vec<FieldDescriptor>, DataLoadError> {
    data.iter()
        .map(|f| {
            let descriptor = FieldDescriptor::new(&f.name, f.index, shape(&f.shape, layouts, path)?);
            Ok(if f.unknown { descriptor.unknown() } else { descriptor })
        })
        .collect()
}

// ===========================================================================
// Merge filters
// ===========================================================================

/// Resolve member names along `steps`, starting at a list entry's shape.
fn steps(data: &[StepData], mut at: &Shape, path: &Path) -> Result<Vec<Step>, DataLoadError> {
    let mut resolved = Vec::with_capacity(data.len());
    for step in data {
        match (step, at) {
            (StepData::Index(i), Shape::List(element) | Shape::FixedArray { element, .. }) => {
                resolved.push(Step::Index(*i));
                at = &**element;
            }
            (StepData::Member(name), Shape::Group(layout)) => {
                let member = layout.member_by_name(name).ok_or_else(|| DataLoadError::UnresolvedRef {
                    file: path.to_path_buf(),
                    name: name.clone(),
                    expected_kind: "member",
                })?;
                resolved.push(Step::Member(member.index));
                at = &member.shape;
            }
            _ => {
                return Err(DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: format!("merge filter step {step:?} does not fit the entry shape"),
                });
            }
        }
    }
    Ok(resolved)
}

fn merge_filter(
    data: &MergeFilterData,
    fields: &[FieldDescriptor],
    field_names: &HashMap<String, FieldIndex>,
    path: &Path,
) -> Result<MergeFilter, DataLoadError> {
    match data {
        MergeFilterData::InvalidEntries { list, reference } => {
            let index = *resolve_name(field_names, list, path, "field")?;
            let element = fields
                .iter()
                .find(|f| f.index == index)
                .and_then(|f| match &f.shape {
                    Shape::List(element) => Some(&**element),
                    _ => None,
                })
                .ok_or_else(|| DataLoadError::Parse {
                    file: path.to_path_buf(),
                    detail: format!("merge filter field '{list}' is not a list"),
                })?;
            Ok(MergeFilter::InvalidEntries {
                list: index,
                reference: steps(reference, element, path)?,
            })
        }
        MergeFilterData::All(filters) => Ok(MergeFilter::All(
            filters
                .iter()
                .map(|f| merge_filter(f, fields, field_names, path))
                .collect::<Result<_, _>>()?,
        )),
    }
}

// ===========================================================================
// Record types
// ===========================================================================

fn record_schema(
    data: &RecordTypeData,
    layouts: &HashMap<String, Arc<GroupLayout>>,
    path: &Path,
) -> Result<RecordSchema, DataLoadError> {
    let tag = TypeTag::parse(&data.tag).ok_or_else(|| DataLoadError::InvalidTag {
        file: path.to_path_buf(),
        tag: data.tag.clone(),
    })?;
    let fields = fields(&data.fields, layouts, path)?;
    let field_names: HashMap<String, FieldIndex> =
        fields.iter().map(|f| (f.name.clone(), f.index)).collect();

    let mut schema = RecordSchema::new(tag, &data.name);
    for flag in &data.flags {
        let field = *resolve_name(&field_names, &flag.field, path, "field")?;
        schema = schema.with_flag(MaskedView::flag(&flag.name, field, flag.bits));
    }
    for inverted in &data.inverted {
        schema = schema.with_inverted_flag(&inverted.name, &inverted.of);
    }
    for family in &data.families {
        let field = *resolve_name(&field_names, &family.field, path, "field")?;
        let variants: Vec<(&str, u64)> = family.variants.iter().map(|v| (v.name.as_str(), v.value)).collect();
        schema = schema.with_family(VariantFamily::new(&family.name, field, family.mask, &variants));
    }
    for group in &data.groups {
        let members: Vec<&str> = group.members.iter().map(String::as_str).collect();
        schema = schema.with_attribute_group(&group.name, &members);
    }
    if let Some(parent) = &data.parent_field {
        schema = schema.with_parent_field(resolve_name(&field_names, parent, path, "field")?.0);
    }
    if let Some(filter) = &data.merge_filter {
        schema = schema.with_merge_filter(merge_filter(filter, &fields, &field_names, path)?);
    }
    Ok(fields.into_iter().fold(schema, RecordSchema::with_field))
}

// ===========================================================================
// Loading
// ===========================================================================

/// Register every layout and record type of one catalog. Layouts may use
/// layouts declared earlier in the same catalog or already registered.
pub fn register_catalog(
    builder: &mut SchemaRegistryBuilder,
    catalog: &CatalogData,
    path: &Path,
) -> Result<(), DataLoadError> {
    let mut layouts: HashMap<String, Arc<GroupLayout>> = HashMap::new();
    for data in &catalog.layouts {
        check_duplicate(&layouts, &data.name, path)?;
        let known = known_layouts(builder, &layouts, &data.fields);
        let layout = GroupLayout::new(&data.name, fields(&data.fields, &known, path)?);
        builder.register_layout(layout.clone());
        layouts.insert(data.name.clone(), layout);
    }

    let mut names: HashMap<String, TypeTag> = HashMap::new();
    for data in &catalog.records {
        check_duplicate(&names, &data.name, path)?;
        let known = known_layouts(builder, &layouts, &data.fields);
        let tag = builder.register_schema(record_schema(data, &known, path)?);
        names.insert(data.name.clone(), tag);
    }
    debug!(
        file = %path.display(),
        layouts = catalog.layouts.len(),
        records = catalog.records.len(),
        "registered schema catalog"
    );
    Ok(())
}

/// Layouts visible to `fields`: this catalog's, then the builder's.
fn known_layouts(
    builder: &SchemaRegistryBuilder,
    local: &HashMap<String, Arc<GroupLayout>>,
    fields: &[FieldData],
) -> HashMap<String, Arc<GroupLayout>> {
    let mut known = local.clone();
    let mut pending: Vec<&ShapeData> = fields.iter().map(|f| &f.shape).collect();
    while let Some(shape) = pending.pop() {
        match shape {
            ShapeData::Scalar(_) => {}
            ShapeData::Array { element, .. } | ShapeData::List(element) => pending.push(element),
            ShapeData::Group(name) => {
                if !known.contains_key(name) {
                    if let Some(layout) = builder.layout(name) {
                        known.insert(name.clone(), layout);
                    }
                }
            }
        }
    }
    known
}

/// Read one catalog file and build a registry from it.
pub fn load_catalog(path: &Path) -> Result<SchemaRegistry, DataLoadError> {
    let catalog: CatalogData = deserialize_file(path)?;
    let mut builder = SchemaRegistryBuilder::new();
    register_catalog(&mut builder, &catalog, path)?;
    Ok(builder.build()?)
}
