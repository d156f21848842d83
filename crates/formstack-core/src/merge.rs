//! Merge filters: per-record-type cleanup run on records written into a
//! patch file.
//!
//! A filter only ever removes list entries whose embedded reference does not
//! resolve in the target file. Running a filter twice removes nothing the
//! second time.

use crate::collection::Collection;
use crate::diagnostic::Diagnostic;
use crate::field::{FieldMap, Shape, Step};
use crate::formid::{FormId, MasterList};
use crate::handle::RecordHandle;
use crate::id::{FieldIndex, FileId};
use crate::registry::SchemaError;
use crate::resolver::ResolveError;
use crate::schema::RecordSchema;
use crate::store::RecordError;
use crate::value::{Primitive, Slot, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MergeFilter {
    /// Leave the record untouched.
    #[default]
    None,
    /// Drop entries of list field `list` whose reference at `reference`
    /// (relative to each entry) does not resolve in the target.
    InvalidEntries { list: FieldIndex, reference: Vec<Step> },
    /// Run several filters in order.
    All(Vec<MergeFilter>),
}

impl MergeFilter {
    pub fn validate(&self, schema: &RecordSchema) -> Result<(), SchemaError> {
        match self {
            MergeFilter::None => Ok(()),
            MergeFilter::InvalidEntries { list, reference } => {
                let invalid = || SchemaError::InvalidMergeFilter {
                    tag: schema.tag,
                    list: *list,
                };
                let Some(Shape::List(element)) = schema.field(*list).map(|f| &f.shape) else {
                    return Err(invalid());
                };
                match element.at(reference, 1) {
                    Ok(Shape::Scalar(
                        Primitive::FormId
                        | Primitive::FormIdOrInt
                        | Primitive::FormIdOrFloat
                        | Primitive::FormIdOrString,
                    )) => Ok(()),
                    _ => Err(invalid()),
                }
            }
            MergeFilter::All(filters) => filters.iter().try_for_each(|f| f.validate(schema)),
        }
    }

    /// Entries this filter would drop, as `(list, index, reference)`.
    fn invalid_entries(&self, fields: &FieldMap, frame: &MasterList) -> Vec<(FieldIndex, usize, FormId)> {
        match self {
            MergeFilter::None => Vec::new(),
            MergeFilter::InvalidEntries { list, reference } => {
                let Some(Slot::Seq(items)) = fields.get(list) else {
                    return Vec::new();
                };
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| match follow(item, reference) {
                        Some(Slot::Value(Value::FormId(form))) if !form.is_valid(frame) => {
                            Some((*list, i, form.clone()))
                        }
                        _ => None,
                    })
                    .collect()
            }
            MergeFilter::All(_) => Vec::new(),
        }
    }

    /// Apply to a raw field map, recording one diagnostic per removed entry.
    pub fn apply(
        &self,
        schema: &RecordSchema,
        fields: &mut FieldMap,
        frame: &MasterList,
        record: &FormId,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> usize {
        if let MergeFilter::All(filters) = self {
            return filters
                .iter()
                .map(|f| f.apply(schema, fields, frame, record, diagnostics))
                .sum();
        }
        let doomed = self.invalid_entries(fields, frame);
        remove_entries(schema, fields, record, doomed, diagnostics)
    }

    /// Whether applying would change anything.
    fn would_remove(&self, fields: &FieldMap, frame: &MasterList) -> bool {
        match self {
            MergeFilter::All(filters) => filters.iter().any(|f| f.would_remove(fields, frame)),
            _ => !self.invalid_entries(fields, frame).is_empty(),
        }
    }
}

fn follow<'a>(slot: &'a Slot, steps: &[Step]) -> Option<&'a Slot> {
    steps.iter().try_fold(slot, |slot, step| match (slot, step) {
        (Slot::Seq(items), Step::Index(i)) => items.get(*i),
        (Slot::Group(members), Step::Member(m)) => members.get(m),
        _ => None,
    })
}

fn remove_entries(
    schema: &RecordSchema,
    fields: &mut FieldMap,
    record: &FormId,
    doomed: Vec<(FieldIndex, usize, FormId)>,
    diagnostics: &mut Vec<Diagnostic>,
) -> usize {
    let mut removed = 0;
    // Highest index first so earlier indices stay put.
    for (list, index, reference) in doomed.into_iter().rev() {
        if let Some(Slot::Seq(items)) = fields.get_mut(&list) {
            items.remove(index);
            removed += 1;
            let attribute = schema.field(list).map(|f| f.name.clone()).unwrap_or_default();
            warn!(record = %record, attribute = %attribute, index, reference = %reference,
                "merge filter dropped list entry with unresolvable reference");
            diagnostics.push(Diagnostic::EntryDropped {
                record: record.clone(),
                attribute,
                index,
                reference,
            });
        }
    }
    removed
}

/// Run the record type's merge filter on `handle` against `target`'s master
/// list. Returns what was removed.
pub fn merge_filter(coll: &mut Collection, handle: RecordHandle, target: FileId) -> Result<Vec<Diagnostic>, ResolveError> {
    let schema = handle.schema(coll)?;
    let frame = coll
        .file(target)
        .map(|p| p.frame().clone())
        .ok_or(RecordError::Unloaded(handle.id()))?;
    let filter = schema.merge_filter();
    let mut diagnostics = Vec::new();
    if !filter.would_remove(coll.store().fields(handle.id())?, &frame) {
        return Ok(diagnostics);
    }
    let form = handle.form_id(coll)?;
    let fields = coll.store_mut().fields_mut(handle.id())?;
    let removed = filter.apply(&schema, fields, &frame, &form, &mut diagnostics);
    debug!(form = %form, removed, "merge filter removed list entries");
    Ok(diagnostics)
}
