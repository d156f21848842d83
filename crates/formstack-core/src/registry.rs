use crate::field::GroupLayout;
use crate::id::{FieldIndex, TypeTag};
use crate::schema::RecordSchema;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing an immutable SchemaRegistry.
/// Three-phase lifecycle: registration -> mutation -> finalization.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: Vec<RecordSchema>,
    tag_to_index: HashMap<TypeTag, usize>,
    layouts: HashMap<String, Arc<GroupLayout>>,
    duplicate: Option<TypeTag>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: Register a named group layout for reuse by record schemas.
    pub fn register_layout(&mut self, layout: Arc<GroupLayout>) {
        self.layouts.insert(layout.name.clone(), layout);
    }

    /// Phase 1: Register a record type's schema. Registering the same tag
    /// twice is reported by `build`.
    pub fn register_schema(&mut self, schema: RecordSchema) -> TypeTag {
        let tag = schema.tag;
        if self.tag_to_index.contains_key(&tag) {
            self.duplicate.get_or_insert(tag);
            return tag;
        }
        self.tag_to_index.insert(tag, self.schemas.len());
        self.schemas.push(schema);
        tag
    }

    /// Phase 2: Replace an existing schema through a transform.
    pub fn mutate_schema<F>(&mut self, tag: TypeTag, f: F) -> Result<(), SchemaError>
    where
        F: FnOnce(RecordSchema) -> RecordSchema,
    {
        let index = *self
            .tag_to_index
            .get(&tag)
            .ok_or(SchemaError::NotFound(tag.to_string()))?;
        let schema = std::mem::replace(&mut self.schemas[index], RecordSchema::new(tag, ""));
        self.schemas[index] = f(schema);
        Ok(())
    }

    /// Lookup a registered layout by name.
    pub fn layout(&self, name: &str) -> Option<Arc<GroupLayout>> {
        self.layouts.get(name).cloned()
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.tag_to_index.contains_key(&tag)
    }

    /// Phase 3: Validate every schema and build the immutable registry.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        if let Some(tag) = self.duplicate {
            return Err(SchemaError::DuplicateType(tag));
        }
        for schema in &self.schemas {
            schema.validate()?;
        }

        let schemas = self
            .schemas
            .into_iter()
            .map(|s| (s.tag, Arc::new(s)))
            .collect();
        Ok(SchemaRegistry { schemas })
    }
}

/// Immutable map from record type tag to schema. Frozen after build().
/// Consulted at the decode boundary only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<TypeTag, Arc<RecordSchema>>,
}

impl SchemaRegistry {
    pub fn get(&self, tag: TypeTag) -> Option<&Arc<RecordSchema>> {
        self.schemas.get(&tag)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<RecordSchema>> {
        self.schemas.values().find(|s| s.name == name)
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<TypeTag> {
        let mut tags: Vec<_> = self.schemas.keys().copied().collect();
        tags.sort();
        tags
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("record type {0} registered twice")]
    DuplicateType(TypeTag),
    #[error("{tag}: duplicate field '{name}'")]
    DuplicateField { tag: TypeTag, name: String },
    #[error("{tag}: field '{name}' nests lists deeper than three levels")]
    NestingTooDeep { tag: TypeTag, name: String },
    #[error("{tag}: view '{view}' needs an integer scalar backing field")]
    InvalidBacking { tag: TypeTag, view: String },
    #[error("{tag}: family '{family}' variant '{variant}' overlaps or escapes its mask")]
    InvalidVariant {
        tag: TypeTag,
        family: String,
        variant: String,
    },
    #[error("{tag}: unknown attribute '{name}'")]
    UnknownAttribute { tag: TypeTag, name: String },
    #[error("{tag}: parent field {index:?} is not a reference")]
    InvalidParentField { tag: TypeTag, index: FieldIndex },
    #[error("{tag}: merge filter list {list:?} does not lead to a reference")]
    InvalidMergeFilter { tag: TypeTag, list: FieldIndex },
}
