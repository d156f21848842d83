//! Formstack Core -- records, identities and override resolution for stacks
//! of game data plugins.
//!
//! A load order of plugin files is held in a [`collection::Collection`].
//! Later files may define new records or override records introduced by
//! earlier ones. This crate decodes record fields through declarative
//! schemas, ties record instances together across files by FormID, and
//! answers "which version wins" on demand.
//!
//! # Identity
//!
//! Records are identified by a [`formid::FormId`]: the defining file plus a
//! 24-bit object number. In memory every identity is held in this long form.
//! The short form (a master-list slot in the top byte) exists only at the
//! file boundary and is re-derived for whichever file is being read or
//! written.
//!
//! # Access Pattern
//!
//! Handles are plain keys; every call takes the collection explicitly:
//!
//! ```rust,ignore
//! let chest = coll.lookup(file, &form).unwrap();
//! let i = chest.grow(&mut coll, "items", &[])?;
//! chest.set_at(&mut coll, "items", &[Step::Index(i), Step::Member(FieldIndex(0))], item)?;
//! let winning = chest.is_winning(&coll, false)?;
//! ```
//!
//! # Key Types
//!
//! - [`collection::Collection`] -- Load order, files, schema registry and
//!   record storage.
//! - [`handle::RecordHandle`] -- `Copy` key naming one physical record
//!   instance; field access, lifecycle and duplication.
//! - [`field::FieldDescriptor`] -- Declarative field with a recursive
//!   [`field::Shape`] (scalar, fixed array, list, group).
//! - [`masked::MaskedView`] -- Flags and variant families over packed
//!   integer fields.
//! - [`registry::SchemaRegistry`] -- Immutable map from record type to
//!   schema (frozen at startup).
//! - [`resolver`] -- Override chains, winners, conflicts and diffs.
//! - [`patcher::Patcher`] -- Merged-patch output with per-type
//!   [`merge::MergeFilter`]s.
//! - [`serialize`] -- Versioned binary plugin codec via bitcode.

pub mod collection;
pub mod diagnostic;
pub mod field;
pub mod formid;
pub mod handle;
pub mod id;
pub mod masked;
pub mod merge;
pub mod patcher;
pub mod plugin;
pub mod registry;
pub mod remap;
pub mod resolver;
pub mod schema;
pub mod serialize;
pub mod store;
pub mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
