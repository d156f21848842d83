//! Criterion benchmarks for override resolution and the plugin codec.
//!
//! Three benchmark groups:
//! - `resolve`: chains, winners and conflicts over a 32-file stack with
//!   2000 identities, every fourth one overridden in each file
//! - `diff`: attribute diffs against the previous override
//! - `codec`: save and reload of a 2000-record plugin

use criterion::{Criterion, criterion_group, criterion_main};
use formstack_core::collection::Collection;
use formstack_core::formid::FormId;
use formstack_core::id::FileId;
use formstack_core::resolver;
use formstack_core::serialize::serialize_plugin;
use formstack_core::test_utils::*;

// ===========================================================================
// Stack builders
// ===========================================================================

const FILES: usize = 32;
const RECORDS: u32 = 2000;

/// Build a load order of `FILES` plugins. The first defines `RECORDS`
/// containers; each later file overrides a quarter of them.
fn build_stack() -> (Collection, Vec<FileId>) {
    let names: Vec<String> = (0..FILES)
        .map(|i| if i == 0 { "Base.esm".to_string() } else { format!("Mod{i:02}.esp") })
        .collect();
    let order: Vec<(&str, bool)> = names.iter().map(|n| (n.as_str(), false)).collect();
    let (mut coll, files) = stack(&order);

    let mut bases = Vec::with_capacity(RECORDS as usize);
    for object_id in 0..RECORDS {
        let chest = loaded_container(&mut coll, files[0], 0x800 + object_id, "Chest");
        add_item(&mut coll, chest, FormId::new("Base.esm", 0x10), 1);
        bases.push(chest);
    }
    for (n, &file) in files.iter().enumerate().skip(1) {
        for (i, &base) in bases.iter().enumerate() {
            if (i + n) % 4 == 0 {
                override_full(&mut coll, base, file, "Override");
            }
        }
    }
    (coll, files)
}

fn forms() -> Vec<FormId> {
    (0..RECORDS).map(|i| FormId::new("Base.esm", 0x800 + i)).collect()
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_resolve(c: &mut Criterion) {
    let (coll, _) = build_stack();
    let forms = forms();
    let handles: Vec<_> = forms
        .iter()
        .flat_map(|f| resolver::override_chain(&coll, f, false).unwrap())
        .collect();

    let mut group = c.benchmark_group("resolve");
    group.bench_function("override_chain_2000", |b| {
        b.iter(|| {
            for form in &forms {
                resolver::override_chain(&coll, form, false).unwrap();
            }
        });
    });
    group.bench_function("winner_2000", |b| {
        b.iter(|| {
            for form in &forms {
                resolver::winner(&coll, form, false).unwrap();
            }
        });
    });
    group.bench_function("is_winning_all_instances", |b| {
        b.iter(|| {
            for handle in &handles {
                handle.is_winning(&coll, false).unwrap();
            }
        });
    });
    group.bench_function("conflicts_2000", |b| {
        b.iter(|| {
            for form in &forms {
                resolver::conflicts(&coll, form, false).unwrap();
            }
        });
    });
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let (coll, _) = build_stack();
    let winners: Vec<_> = forms()
        .iter()
        .filter_map(|f| resolver::winner(&coll, f, false).unwrap())
        .collect();

    c.bench_function("diff_winners_all_attributes", |b| {
        b.iter(|| {
            for &handle in &winners {
                let schema = handle.schema(&coll).unwrap();
                handle.diff(&coll, &schema.diff_attributes()).unwrap();
            }
        });
    });
}

fn bench_codec(c: &mut Criterion) {
    let (mut coll, files) = build_stack();
    let data = serialize_plugin(&mut coll, files[0]).unwrap();

    let mut group = c.benchmark_group("codec");
    group.bench_function("serialize_2000_records", |b| {
        b.iter(|| {
            serialize_plugin(&mut coll, files[0]).unwrap();
        });
    });
    group.bench_function("load_2000_records", |b| {
        b.iter(|| {
            let mut fresh = empty_collection();
            fresh.load_plugin(&data, false).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_diff, bench_codec);
criterion_main!(benches);
