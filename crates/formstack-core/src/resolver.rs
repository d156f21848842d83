//! Override and conflict resolution.
//!
//! Nothing here is precomputed: every query walks the load order on demand,
//! looking each identity up in every file's short-FormID index the same way
//! the file format locates records.
//!
//! Scan-only files never win. In extended mode they still take part as
//! disqualifiers: an instance followed by a scan-only instance is not
//! winning, and the identity has no winner at all.

use crate::collection::{Collection, CollectionError};
use crate::diagnostic::Diagnostic;
use crate::field::{FieldDescriptor, FieldError, Shape};
use crate::formid::{FormId, MasterList};
use crate::handle::RecordHandle;
use crate::id::FieldIndex;
use crate::schema::RecordSchema;
use crate::store::RecordError;
use crate::value::{FieldValue, Value};
use tracing::{trace, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{form} has {found} instances, more than the limit of {limit}")]
    HistoryOverflow { form: FormId, found: usize, limit: usize },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// Every live instance of `form`, oldest first. Scan-only files are
/// included only in `extended` mode.
pub fn override_chain(coll: &Collection, form: &FormId, extended: bool) -> Result<Vec<RecordHandle>, ResolveError> {
    let mut chain = Vec::new();
    if form.is_null() {
        return Ok(chain);
    }
    for &file in coll.load_order() {
        let Some(plugin) = coll.file(file) else { continue };
        if plugin.scan_only && !extended {
            continue;
        }
        chain.extend(coll.instances(file, form));
    }
    let limit = coll.config().max_history.min(coll.load_order().len());
    if chain.len() > limit {
        return Err(ResolveError::HistoryOverflow {
            form: form.clone(),
            found: chain.len(),
            limit,
        });
    }
    trace!(form = %form, members = chain.len(), extended, "built override chain");
    Ok(chain)
}

fn is_scan_only(coll: &Collection, handle: RecordHandle) -> Result<bool, RecordError> {
    let file = handle.file(coll)?;
    Ok(coll.file(file).is_some_and(|p| p.scan_only))
}

/// The authoritative instance: the chain's last member, unless that member
/// is scan-only.
pub fn winner(coll: &Collection, form: &FormId, extended: bool) -> Result<Option<RecordHandle>, ResolveError> {
    let chain = override_chain(coll, form, extended)?;
    match chain.last() {
        Some(&last) if !is_scan_only(coll, last)? => Ok(Some(last)),
        _ => Ok(None),
    }
}

/// Whether no later file holds this identity. Scans forward from the
/// handle's own file and stops at the first later instance.
pub fn is_winning(coll: &Collection, handle: RecordHandle, extended: bool) -> Result<bool, ResolveError> {
    let record = coll.store().get(handle.id())?;
    let Some(plugin) = coll.file(record.file) else {
        return Ok(false);
    };
    if plugin.scan_only {
        return Ok(false);
    }
    let form = &record.form_id;
    if coll.instances(record.file, form).last() != Some(handle) {
        return Ok(false);
    }
    let Some(position) = coll.position(record.file) else {
        return Ok(false);
    };
    for &later in &coll.load_order()[position + 1..] {
        let Some(plugin) = coll.file(later) else { continue };
        if plugin.scan_only && !extended {
            continue;
        }
        if coll.lookup(later, form).is_some() {
            trace!(form = %form, file = %plugin.name(), "later instance found");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Every chain member except the winner; empty for chains of fewer than
/// two members.
pub fn conflicts(coll: &Collection, form: &FormId, extended: bool) -> Result<Vec<RecordHandle>, ResolveError> {
    let mut chain = override_chain(coll, form, extended)?;
    if chain.len() < 2 {
        return Ok(Vec::new());
    }
    if let Some(&last) = chain.last() {
        if !is_scan_only(coll, last)? {
            chain.pop();
        }
    }
    Ok(chain)
}

/// Nearest earlier authoritative instance of the same identity.
pub fn previous(coll: &Collection, handle: RecordHandle) -> Result<Option<RecordHandle>, ResolveError> {
    let form = handle.form_id(coll)?;
    let chain = override_chain(coll, &form, true)?;
    let Some(pos) = chain.iter().position(|h| *h == handle) else {
        return Ok(None);
    };
    for &earlier in chain[..pos].iter().rev() {
        if !is_scan_only(coll, earlier)? {
            return Ok(Some(earlier));
        }
    }
    Ok(None)
}

/// Nearest earlier authoritative instance held by one of the masters of
/// the handle's file, falling back to [`previous`]. This is the version the
/// handle's file was authored against.
pub fn previous_in_masters(coll: &Collection, handle: RecordHandle) -> Result<Option<RecordHandle>, ResolveError> {
    let record = coll.store().get(handle.id())?;
    let Some(plugin) = coll.file(record.file) else {
        return Ok(None);
    };
    let chain = override_chain(coll, &record.form_id, true)?;
    let Some(pos) = chain.iter().position(|h| *h == handle) else {
        return Ok(None);
    };
    for &earlier in chain[..pos].iter().rev() {
        let file = earlier.file(coll)?;
        let Some(earlier_plugin) = coll.file(file) else { continue };
        if !earlier_plugin.scan_only && plugin.masters().contains(earlier_plugin.name()) {
            return Ok(Some(earlier));
        }
    }
    previous(coll, handle)
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// Attributes that differ from the previous instance, with anything that
/// had to be dropped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Reported attributes in field-index order.
    pub values: Vec<(String, FieldValue)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Diff {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Expand attribute names and group names into units compared together.
fn units<'s>(schema: &'s RecordSchema, attributes: &[&str]) -> Result<Vec<Vec<&'s FieldDescriptor>>, FieldError> {
    let mut units = Vec::new();
    for &name in attributes {
        if let Some(field) = schema.field_by_name(name) {
            units.push(vec![field]);
        } else if let Some(group) = schema.attribute_group(name) {
            let mut members = Vec::new();
            for member in &group.members {
                members.push(
                    schema
                        .field_by_name(member)
                        .ok_or_else(|| FieldError::UnknownField(member.clone()))?,
                );
            }
            units.push(members);
        } else {
            return Err(FieldError::UnknownField(name.to_string()));
        }
    }
    Ok(units)
}

/// Fields of `handle` among `attributes` that differ from the previous
/// instance. Groups are reported whole. Everything is reported when there is
/// no previous instance.
pub fn changed_fields(
    coll: &Collection,
    handle: RecordHandle,
    attributes: &[&str],
) -> Result<Vec<FieldIndex>, ResolveError> {
    changed_against(coll, handle, previous(coll, handle)?, attributes)
}

/// Fields of `handle` among `attributes` that differ from `parent`.
pub fn changed_against(
    coll: &Collection,
    handle: RecordHandle,
    parent: Option<RecordHandle>,
    attributes: &[&str],
) -> Result<Vec<FieldIndex>, ResolveError> {
    let schema = handle.schema(coll)?;
    let units = units(&schema, attributes)?;
    let own = coll.store().fields(handle.id())?;
    let parent = match parent {
        Some(p) => Some(coll.store().fields(p.id())?),
        None => None,
    };
    let mut changed: Vec<FieldIndex> = Vec::new();
    for unit in units {
        let differs = match parent {
            None => true,
            Some(parent) => unit.iter().any(|f| !f.equal_in(parent, own)),
        };
        if differs {
            changed.extend(unit.iter().map(|f| f.index));
        }
    }
    changed.sort();
    changed.dedup();
    Ok(changed)
}

/// Compare the requested attributes of `handle` against the nearest earlier
/// instance. References that do not resolve in the handle's file are left
/// out: a scalar drops its whole attribute, a list loses the entries that
/// carry one.
pub fn diff(coll: &Collection, handle: RecordHandle, attributes: &[&str]) -> Result<Diff, ResolveError> {
    let schema = handle.schema(coll)?;
    let record = coll.store().get(handle.id())?;
    let frame = coll
        .file(record.file)
        .map(|p| p.frame().clone())
        .ok_or(RecordError::Unloaded(handle.id()))?;
    let mut diff = Diff::default();
    for index in changed_fields(coll, handle, attributes)? {
        let Some(field) = schema.field(index) else { continue };
        let value = field.read(record.fields());
        if let Some(value) = sanitize(field, value, &frame, &record.form_id, &mut diff.diagnostics) {
            diff.values.push((field.name.clone(), value));
        }
    }
    Ok(diff)
}

/// First reference anywhere in `value` that does not resolve in `frame`.
pub(crate) fn first_invalid(value: &FieldValue, frame: &MasterList) -> Option<FormId> {
    match value {
        FieldValue::Value(Value::FormId(form)) => (!form.is_valid(frame)).then(|| form.clone()),
        FieldValue::Value(_) | FieldValue::Unset => None,
        FieldValue::List(items) => items.iter().find_map(|v| first_invalid(v, frame)),
        FieldValue::Group(members) => members.iter().find_map(|(_, v)| first_invalid(v, frame)),
    }
}

fn sanitize(
    field: &FieldDescriptor,
    value: FieldValue,
    frame: &MasterList,
    record: &FormId,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<FieldValue> {
    match (&field.shape, value) {
        (Shape::List(_), FieldValue::List(items)) => {
            let mut kept = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match first_invalid(&item, frame) {
                    Some(reference) => {
                        warn!(record = %record, attribute = %field.name, index, reference = %reference,
                            "dropping list entry with unresolvable reference");
                        diagnostics.push(Diagnostic::EntryDropped {
                            record: record.clone(),
                            attribute: field.name.clone(),
                            index,
                            reference,
                        });
                    }
                    None => kept.push(item),
                }
            }
            Some(FieldValue::List(kept))
        }
        (_, value) => match first_invalid(&value, frame) {
            Some(reference) => {
                warn!(record = %record, attribute = %field.name, reference = %reference,
                    "dropping attribute with unresolvable reference");
                diagnostics.push(Diagnostic::UnresolvableReference {
                    record: record.clone(),
                    attribute: field.name.clone(),
                    reference,
                });
                None
            }
            None => Some(value),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionConfig;
    use crate::test_utils::*;

    #[test]
    fn chain_is_in_load_order() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", false), ("C.esp", false)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        let c = override_full(&mut coll, a, files[2], "C");
        let b = override_full(&mut coll, a, files[1], "B");
        let form = a.form_id(&coll).unwrap();
        assert_eq!(override_chain(&coll, &form, false).unwrap(), vec![a, b, c]);
        assert_eq!(winner(&coll, &form, false).unwrap(), Some(c));
    }

    #[test]
    fn null_identity_has_no_chain() {
        let (coll, _) = stack(&[("A.esm", false)]);
        assert!(override_chain(&coll, &FormId::NULL, true).unwrap().is_empty());
        assert_eq!(winner(&coll, &FormId::NULL, false).unwrap(), None);
    }

    #[test]
    fn single_member_has_no_conflicts() {
        let (mut coll, files) = stack(&[("A.esm", false)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        assert!(conflicts(&coll, &a.form_id(&coll).unwrap(), true).unwrap().is_empty());
        assert!(is_winning(&coll, a, true).unwrap());
    }

    #[test]
    fn scan_only_never_wins() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", false), ("C.esp", true)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        let b = override_full(&mut coll, a, files[1], "B");
        let c = override_full(&mut coll, a, files[2], "C");
        let form = a.form_id(&coll).unwrap();
        assert_eq!(winner(&coll, &form, false).unwrap(), Some(b));
        assert_eq!(winner(&coll, &form, true).unwrap(), None);
        assert!(!is_winning(&coll, c, true).unwrap());
        assert_eq!(conflicts(&coll, &form, false).unwrap(), vec![a]);
        assert_eq!(conflicts(&coll, &form, true).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn is_winning_matches_chain() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", true), ("C.esp", false)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        override_full(&mut coll, a, files[1], "B");
        let form = a.form_id(&coll).unwrap();
        for extended in [false, true] {
            let w = winner(&coll, &form, extended).unwrap();
            for h in override_chain(&coll, &form, true).unwrap() {
                assert_eq!(is_winning(&coll, h, extended).unwrap(), w == Some(h), "{h:?} {extended}");
            }
        }
    }

    #[test]
    fn history_overflow_is_fatal() {
        let config = CollectionConfig { max_history: 2 };
        let (mut coll, files) = stack_with_config(&[("A.esm", false), ("B.esp", false), ("C.esp", false)], config);
        let a = container(&mut coll, files[0], 0x10, "A");
        override_full(&mut coll, a, files[1], "B");
        override_full(&mut coll, a, files[2], "C");
        let err = override_chain(&coll, &a.form_id(&coll).unwrap(), false).unwrap_err();
        assert!(matches!(err, ResolveError::HistoryOverflow { found: 3, limit: 2, .. }));
    }

    #[test]
    fn duplicate_instances_in_one_file_overflow() {
        let (mut coll, files) = stack(&[("A.esm", false)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        container(&mut coll, files[0], 0x10, "again");
        let err = a.history(&coll).unwrap_err();
        assert!(matches!(err, ResolveError::HistoryOverflow { found: 2, limit: 1, .. }));
    }

    #[test]
    fn diff_reports_changed_attributes_only() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", false)]);
        let a = container(&mut coll, files[0], 0x10, "Old");
        let b = override_full(&mut coll, a, files[1], "New");
        let d = diff(&coll, b, &["full", "editor_id"]).unwrap();
        assert_eq!(d.names(), vec!["full"]);
        assert_eq!(d.get("full"), Some(&FieldValue::Value(Value::from("New"))));
    }

    #[test]
    fn diff_without_parent_reports_everything() {
        let (mut coll, files) = stack(&[("A.esm", false)]);
        let a = container(&mut coll, files[0], 0x10, "Old");
        let d = diff(&coll, a, &["full", "editor_id"]).unwrap();
        assert_eq!(d.names(), vec!["editor_id", "full"]);
    }

    #[test]
    fn group_reported_whole() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", false)]);
        let a = container(&mut coll, files[0], 0x10, "Old");
        let b = override_full(&mut coll, a, files[1], "New");
        let d = diff(&coll, b, &["names"]).unwrap();
        assert_eq!(d.names(), vec!["editor_id", "full"]);
    }

    #[test]
    fn unknown_attribute_is_error() {
        let (mut coll, files) = stack(&[("A.esm", false)]);
        let a = container(&mut coll, files[0], 0x10, "Old");
        assert!(matches!(
            diff(&coll, a, &["nope"]),
            Err(ResolveError::Field(FieldError::UnknownField(_)))
        ));
    }

    #[test]
    fn previous_in_masters_skips_unrelated_files() {
        let mut coll = empty_collection();
        let base = coll.add_file("Base.esm", vec![], false).unwrap();
        let other = coll.add_file("Other.esp", vec!["Base.esm".into()], false).unwrap();
        let late = coll.add_file("Late.esp", vec!["Base.esm".into()], false).unwrap();
        let a = container(&mut coll, base, 0x10, "A");
        let b = override_full(&mut coll, a, other, "B");
        let c = override_full(&mut coll, a, late, "C");
        assert_eq!(previous(&coll, c).unwrap(), Some(b));
        assert_eq!(previous_in_masters(&coll, c).unwrap(), Some(a));
    }

    #[test]
    fn previous_skips_scan_only() {
        let (mut coll, files) = stack(&[("A.esm", false), ("B.esp", true), ("C.esp", false)]);
        let a = container(&mut coll, files[0], 0x10, "A");
        override_full(&mut coll, a, files[1], "B");
        let c = override_full(&mut coll, a, files[2], "C");
        assert_eq!(previous(&coll, c).unwrap(), Some(a));
        assert_eq!(previous(&coll, a).unwrap(), None);
    }
}
