//! Adversarial input tests for the formstack core.
//!
//! Tests edge cases that should either return errors or be handled gracefully
//! without panics.

use formstack_core::collection::{CollectionConfig, CollectionError};
use formstack_core::field::{FieldError, Step};
use formstack_core::formid::FormId;
use formstack_core::id::FieldIndex;
use formstack_core::resolver::{self, ResolveError};
use formstack_core::serialize::{DeserializeError, read_plugin_header, serialize_plugin};
use formstack_core::store::RecordError;
use formstack_core::test_utils::*;
use formstack_core::value::{FieldValue, Value};

/// Every accessor on an unloaded handle fails instead of panicking.
#[test]
fn use_after_unload() {
    let (mut coll, files) = stack(&[("Base.esm", false)]);
    let chest = loaded_container(&mut coll, files[0], 0x10, "Chest");
    chest.unload(&mut coll).unwrap();

    assert!(matches!(chest.form_id(&coll), Err(RecordError::Unloaded(_))));
    assert!(matches!(chest.get(&coll, "full"), Err(FieldError::Record(_))));
    assert!(chest.set(&mut coll, "full", "x").is_err());
    assert!(chest.is_winning(&coll, false).is_err());
    assert!(chest.duplicate_as_override(&mut coll, files[0], false).is_err());
    assert!(chest.unload(&mut coll).is_err());
    assert!(coll.records(files[0]).is_empty());
}

/// A deleted record stays addressable as deleted until saved, then is gone.
#[test]
fn use_after_delete() {
    let (mut coll, files) = stack(&[("Base.esm", false)]);
    let chest = loaded_container(&mut coll, files[0], 0x10, "Chest");
    chest.delete(&mut coll).unwrap();

    assert!(matches!(chest.get(&coll, "full"), Err(FieldError::Record(RecordError::Deleted(_)))));
    assert!(chest.delete(&mut coll).is_err());
    let form = FormId::new("Base.esm", 0x10);
    assert!(resolver::override_chain(&coll, &form, false).unwrap().is_empty());

    serialize_plugin(&mut coll, files[0]).unwrap();
    assert!(matches!(chest.form_id(&coll), Err(RecordError::Unloaded(_))));
}

/// More instances than the history limit is an error, not a truncation.
#[test]
fn history_overflow_is_reported() {
    let names = ["Base.esm", "A.esp", "B.esp", "C.esp"];
    let order: Vec<(&str, bool)> = names.iter().map(|n| (*n, false)).collect();
    let (mut coll, files) = stack_with_config(&order, CollectionConfig { max_history: 2 });
    let base = loaded_container(&mut coll, files[0], 0x10, "Base");
    for &file in &files[1..] {
        override_full(&mut coll, base, file, "Over");
    }

    let form = base.form_id(&coll).unwrap();
    let err = resolver::override_chain(&coll, &form, false).unwrap_err();
    assert!(matches!(err, ResolveError::HistoryOverflow { found: 4, limit: 2, .. }));
}

#[test]
fn unknown_field_and_flag_names() {
    let (mut coll, files) = stack(&[("Base.esm", false)]);
    let chest = container(&mut coll, files[0], 0x10, "Chest");
    assert!(matches!(chest.get(&coll, "nope"), Err(FieldError::UnknownField(_))));
    assert!(chest.flag(&coll, "nope").is_err());
    assert!(chest.set_variant(&mut coll, "size", "huge").is_err());
    assert!(chest.diff(&coll, &["nope"]).is_err());
}

/// Type mismatches and out-of-range indices are rejected without writing.
#[test]
fn bad_writes_leave_record_untouched() {
    let (mut coll, files) = stack(&[("Base.esm", false)]);
    let chest = loaded_container(&mut coll, files[0], 0x10, "Chest");

    assert!(chest.set(&mut coll, "full", 12i64).is_err());
    assert!(chest.set(&mut coll, "items", 1i64).is_err());
    assert!(
        chest
            .set_at(&mut coll, "items", &[Step::Index(5), Step::Member(FieldIndex(0))], 1i64)
            .is_err()
    );
    assert!(!chest.is_modified(&coll).unwrap());
    assert_eq!(chest.get(&coll, "full").unwrap(), FieldValue::Value(Value::from("Chest")));
}

/// Adding a file twice under a different case is a duplicate.
#[test]
fn duplicate_file_names_case_insensitive() {
    let (mut coll, _) = stack(&[("Base.esm", false)]);
    assert!(matches!(
        coll.add_file("BASE.ESM", vec![], false),
        Err(CollectionError::DuplicateFile(_))
    ));
}

/// Truncated or foreign bytes fail to decode.
#[test]
fn garbage_plugin_bytes() {
    let mut coll = empty_collection();
    assert!(matches!(coll.load_plugin(&[], false), Err(DeserializeError::Decode(_))));
    assert!(coll.load_plugin(&[0xFF; 64], false).is_err());
    assert!(read_plugin_header(&[1, 2, 3]).is_err());
    assert!(coll.load_order().is_empty());
}

/// The null identity never resolves to a chain and is never duplicated into.
#[test]
fn null_identity_has_no_records() {
    let (mut coll, files) = stack(&[("Base.esm", false)]);
    let chest = container(&mut coll, files[0], 0x10, "Chest");
    assert!(resolver::winner(&coll, &FormId::NULL, true).unwrap().is_none());
    assert!(
        chest
            .duplicate_as_new(&mut coll, files[0], Some(FormId::NULL))
            .unwrap()
            .is_none()
    );
}
