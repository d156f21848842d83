//! Per-record-type schemas: the field table, masked views, attribute
//! groups, parent link and merge filter of one record type.

use crate::field::{FieldDescriptor, MAX_LIST_DEPTH, Shape};
use crate::id::{FieldIndex, TypeTag};
use crate::masked::{InvertedView, MaskedView, VariantFamily};
use crate::merge::MergeFilter;
use crate::registry::SchemaError;
use crate::value::Primitive;
use std::collections::HashSet;

/// Attributes that are always reported together by diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeGroup {
    pub name: String,
    pub members: Vec<String>,
}

/// Declared layout of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub tag: TypeTag,
    pub name: String,
    fields: Vec<FieldDescriptor>,
    flags: Vec<MaskedView>,
    inverted: Vec<InvertedView>,
    families: Vec<VariantFamily>,
    groups: Vec<AttributeGroup>,
    parent_field: Option<FieldIndex>,
    merge_filter: MergeFilter,
}

impl RecordSchema {
    pub fn new(tag: TypeTag, name: &str) -> Self {
        Self {
            tag,
            name: name.to_string(),
            fields: Vec::new(),
            flags: Vec::new(),
            inverted: Vec::new(),
            families: Vec::new(),
            groups: Vec::new(),
            parent_field: None,
            merge_filter: MergeFilter::None,
        }
    }

    // -- Declaration --

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a flag. Inverted views already declared against its name are
    /// bound to it.
    pub fn with_flag(mut self, flag: MaskedView) -> Self {
        for view in self.inverted.iter_mut().filter(|v| v.of.name == flag.name) {
            view.of = flag.clone();
        }
        self.flags.push(flag);
        self
    }

    /// Declare the complement of a flag. The flag may be declared later.
    pub fn with_inverted_flag(mut self, name: &str, of: &str) -> Self {
        if let Some(flag) = self.flag(of) {
            let view = flag.inverted(name);
            self.inverted.push(view);
        } else {
            // Bound by `with_flag`; validation reports it if it never is.
            self.inverted.push(MaskedView::new(of, FieldIndex(u32::MAX), 0, 0).inverted(name));
        }
        self
    }

    pub fn with_family(mut self, family: VariantFamily) -> Self {
        self.families.push(family);
        self
    }

    pub fn with_attribute_group(mut self, name: &str, members: &[&str]) -> Self {
        self.groups.push(AttributeGroup {
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn with_parent_field(mut self, index: u32) -> Self {
        self.parent_field = Some(FieldIndex(index));
        self
    }

    pub fn with_merge_filter(mut self, filter: MergeFilter) -> Self {
        self.merge_filter = filter;
        self
    }

    // -- Lookup --

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: FieldIndex) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.index == index)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn flag(&self, name: &str) -> Option<&MaskedView> {
        self.flags.iter().find(|f| f.name == name)
    }

    pub fn inverted_flag(&self, name: &str) -> Option<&InvertedView> {
        self.inverted.iter().find(|f| f.name == name)
    }

    pub fn family(&self, name: &str) -> Option<&VariantFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn attribute_group(&self, name: &str) -> Option<&AttributeGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn parent_field(&self) -> Option<FieldIndex> {
        self.parent_field
    }

    pub fn merge_filter(&self) -> &MergeFilter {
        &self.merge_filter
    }

    /// Every field, in index order, for exact round-trip copies.
    pub fn copy_attributes(&self) -> Vec<&str> {
        let mut fields: Vec<_> = self.fields.iter().collect();
        fields.sort_by_key(|f| f.index);
        fields.into_iter().map(|f| f.name.as_str()).collect()
    }

    /// User-facing fields, in index order: opaque payloads and unknown data
    /// are left out.
    pub fn diff_attributes(&self) -> Vec<&str> {
        let mut fields: Vec<_> = self.fields.iter().filter(|f| !f.is_opaque()).collect();
        fields.sort_by_key(|f| f.index);
        fields.into_iter().map(|f| f.name.as_str()).collect()
    }

    // -- Validation --

    pub fn validate(&self) -> Result<(), SchemaError> {
        let tag = self.tag;
        check_fields(tag, &self.fields)?;

        for view in self.flags.iter().chain(self.families.iter().flat_map(|f| f.variants.iter())) {
            self.check_backing(view.field, &view.name)?;
        }
        for view in &self.inverted {
            if self.flag(&view.of.name) != Some(&view.of) {
                return Err(SchemaError::UnknownAttribute {
                    tag,
                    name: view.of.name.clone(),
                });
            }
        }
        for family in &self.families {
            family.validate().map_err(|variant| SchemaError::InvalidVariant {
                tag,
                family: family.name.clone(),
                variant,
            })?;
        }
        for group in &self.groups {
            for member in &group.members {
                if self.field_by_name(member).is_none() {
                    return Err(SchemaError::UnknownAttribute {
                        tag,
                        name: member.clone(),
                    });
                }
            }
        }
        if let Some(index) = self.parent_field {
            match self.field(index).map(|f| &f.shape) {
                Some(Shape::Scalar(Primitive::FormId)) => {}
                _ => return Err(SchemaError::InvalidParentField { tag, index }),
            }
        }
        self.merge_filter.validate(self)
    }

    fn check_backing(&self, index: FieldIndex, view: &str) -> Result<(), SchemaError> {
        match self.field(index).map(|f| &f.shape) {
            Some(Shape::Scalar(p)) if p.is_integer() => Ok(()),
            _ => Err(SchemaError::InvalidBacking {
                tag: self.tag,
                view: view.to_string(),
            }),
        }
    }
}

/// Indices and names must be unique per level, and list nesting bounded.
fn check_fields(tag: TypeTag, fields: &[FieldDescriptor]) -> Result<(), SchemaError> {
    let mut indices = HashSet::new();
    let mut names = HashSet::new();
    for field in fields {
        if !indices.insert(field.index) || !names.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                tag,
                name: field.name.clone(),
            });
        }
        if field.shape.list_depth() > MAX_LIST_DEPTH {
            return Err(SchemaError::NestingTooDeep {
                tag,
                name: field.name.clone(),
            });
        }
        check_shape(tag, &field.shape)?;
    }
    Ok(())
}

fn check_shape(tag: TypeTag, shape: &Shape) -> Result<(), SchemaError> {
    match shape {
        Shape::Scalar(_) => Ok(()),
        Shape::FixedArray { element, .. } | Shape::List(element) => check_shape(tag, element),
        Shape::Group(layout) => check_fields(tag, &layout.fields),
    }
}
