//! Loading pipeline: reads a data directory, builds the schema registry and
//! assembles the load order into a collection.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by the pipeline.
//!
//! A data directory holds:
//! - `schemas.{ron,toml,json}` (required): the schema catalog.
//! - `load_order.{ron,toml,json}` (required): files in load order.
//! - `collection.{ron,toml,json}` (optional): collection tunables.

use formstack_core::collection::{Collection, CollectionConfig, CollectionError};
use formstack_core::formid::FileName;
use formstack_core::registry::{SchemaError, SchemaRegistryBuilder};
use formstack_core::serialize::DeserializeError;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::catalog::register_catalog;
use crate::schema::{CatalogData, PluginEntryData};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// A record type tag is not four bytes.
    #[error("invalid type tag '{tag}' in {file}")]
    InvalidTag { file: PathBuf, tag: String },

    /// A file names a master that is not loaded before it.
    #[error("{plugin}: master '{master}' is not earlier in the load order")]
    MissingMaster { plugin: String, master: String },

    /// A plugin image names a different file than its load order entry.
    #[error("{file}: load order entry '{expected}' holds plugin '{found}'")]
    NameMismatch {
        file: PathBuf,
        expected: String,
        found: String,
    },

    /// A plugin image failed to decode.
    #[error("plugin {file}: {source}")]
    Plugin {
        file: PathBuf,
        #[source]
        source: DeserializeError,
    },

    /// The catalog did not validate.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The load order could not be assembled.
    #[error(transparent)]
    Collection(#[from] CollectionError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    const ALL: [(Format, &'static str); 3] = [(Format::Ron, "ron"), (Format::Toml, "toml"), (Format::Json, "json")];
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .iter()
        .find(|(_, known)| Some(*known) == ext)
        .map(|(format, _)| *format)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for (_, ext) in Format::ALL {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if !candidate.exists() {
            continue;
        }
        if let Some(existing) = found {
            return Err(DataLoadError::ConflictingFormats {
                a: existing,
                b: candidate,
            });
        }
        found = Some(candidate);
    }
    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. TOML cannot hold a bare top-level
/// array, so there the list is read from the array at `toml_key`.
pub fn deserialize_list<T: DeserializeOwned>(path: &Path, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
        .clone();
    array.try_into().map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a
/// `DuplicateName` error if so.
pub fn check_duplicate<V>(map: &HashMap<String, V>, name: &str, file: &Path) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        return Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        });
    }
    Ok(())
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Build a collection from a data directory: registry from `schemas`,
/// tunables from `collection` (if present), then every `load_order` entry
/// in order. Entries with a `plugin` are decoded from that image; the rest
/// are added empty.
pub fn load_stack(dir: &Path) -> Result<Collection, DataLoadError> {
    let schemas_path = require_data_file(dir, "schemas")?;
    let catalog: CatalogData = deserialize_file(&schemas_path)?;
    let mut builder = SchemaRegistryBuilder::new();
    register_catalog(&mut builder, &catalog, &schemas_path)?;
    let registry = Arc::new(builder.build()?);

    let config = match find_data_file(dir, "collection")? {
        Some(path) => deserialize_file(&path)?,
        None => CollectionConfig::default(),
    };

    let order_path = require_data_file(dir, "load_order")?;
    let entries: Vec<PluginEntryData> = deserialize_list(&order_path, "files")?;

    let mut coll = Collection::new(registry, config);
    let mut seen: HashSet<String> = HashSet::new();
    for entry in &entries {
        let name = entry.name.to_ascii_lowercase();
        if !seen.insert(name.clone()) {
            return Err(DataLoadError::DuplicateName {
                file: order_path.clone(),
                name: entry.name.clone(),
            });
        }
        let masters = add_entry(&mut coll, dir, &order_path, entry)?;
        for master in &masters {
            let master_name = master.as_str().to_ascii_lowercase();
            if master_name == name || !seen.contains(&master_name) {
                return Err(DataLoadError::MissingMaster {
                    plugin: entry.name.clone(),
                    master: master.to_string(),
                });
            }
        }
    }
    debug!(dir = %dir.display(), files = entries.len(), "loaded stack");
    Ok(coll)
}

/// Add one load order entry. Returns the masters it ended up with.
fn add_entry(
    coll: &mut Collection,
    dir: &Path,
    order_path: &Path,
    entry: &PluginEntryData,
) -> Result<Vec<FileName>, DataLoadError> {
    let Some(plugin) = &entry.plugin else {
        let masters: Vec<FileName> = entry.masters.iter().map(FileName::new).collect();
        coll.add_file(entry.name.as_str(), masters.clone(), entry.scan_only)?;
        return Ok(masters);
    };

    let path = dir.join(plugin);
    let bytes = std::fs::read(&path)?;
    let file = coll
        .load_plugin(&bytes, entry.scan_only)
        .map_err(|source| DataLoadError::Plugin {
            file: path.clone(),
            source,
        })?;
    let loaded = coll.file(file).ok_or(CollectionError::UnknownFile(file))?;
    if *loaded.name() != FileName::new(entry.name.as_str()) {
        let found = loaded.name().to_string();
        coll.remove_file(file)?;
        return Err(DataLoadError::NameMismatch {
            file: order_path.to_path_buf(),
            expected: entry.name.clone(),
            found,
        });
    }
    debug!(file = %entry.name, path = %path.display(), "loaded plugin image");
    Ok(loaded.masters().to_vec())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use formstack_core::formid::FormId;
    use formstack_core::serialize::serialize_plugin;
    use formstack_core::test_utils::*;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("formstack_data_test_{suffix}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const GLOBAL_SCHEMAS: &str = r#"(records: [(
        tag: "GLOB",
        name: "Global",
        fields: [
            (name: "editor_id", index: 0, shape: Scalar(ident)),
            (name: "value", index: 1, shape: Scalar(form_id_or_float)),
        ],
    )])"#;

    // -----------------------------------------------------------------------
    // detect_format / find_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("schemas.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("schemas.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("schemas.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("schemas.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("schemas")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn find_data_file_single_and_missing() {
        let dir = make_test_dir("find");
        assert_eq!(find_data_file(&dir, "load_order").unwrap(), None);
        fs::write(dir.join("load_order.json"), "[]").unwrap();
        assert_eq!(find_data_file(&dir, "load_order").unwrap(), Some(dir.join("load_order.json")));
        cleanup(&dir);
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("find_conflict");
        fs::write(dir.join("load_order.ron"), "[]").unwrap();
        fs::write(dir.join("load_order.toml"), "").unwrap();
        assert!(matches!(
            find_data_file(&dir, "load_order"),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn require_data_file_missing() {
        let dir = make_test_dir("require_missing");
        let result = require_data_file(&dir, "schemas");
        assert!(matches!(result, Err(DataLoadError::MissingRequired { ref file, .. }) if file == "schemas"));
        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // deserialize_file / deserialize_list
    // -----------------------------------------------------------------------

    #[test]
    fn deserialize_list_all_formats() {
        let dir = make_test_dir("list_formats");
        let ron_path = dir.join("a.ron");
        fs::write(&ron_path, r#"[(name: "A.esm"), (name: "B.esp", masters: ["A.esm"])]"#).unwrap();
        let json_path = dir.join("b.json");
        fs::write(&json_path, r#"[{"name": "A.esm"}, {"name": "B.esp", "scan_only": true}]"#).unwrap();
        let toml_path = dir.join("c.toml");
        fs::write(
            &toml_path,
            r#"
[[files]]
name = "A.esm"

[[files]]
name = "B.esp"
masters = ["A.esm"]
"#,
        )
        .unwrap();

        let ron: Vec<PluginEntryData> = deserialize_list(&ron_path, "files").unwrap();
        let json: Vec<PluginEntryData> = deserialize_list(&json_path, "files").unwrap();
        let toml: Vec<PluginEntryData> = deserialize_list(&toml_path, "files").unwrap();
        assert_eq!(ron[1].masters, vec!["A.esm".to_string()]);
        assert!(json[1].scan_only);
        assert_eq!(toml.len(), 2);
        assert_eq!(toml[1].masters, vec!["A.esm".to_string()]);
        cleanup(&dir);
    }

    #[test]
    fn deserialize_list_toml_missing_key() {
        let dir = make_test_dir("list_toml_missing");
        let path = dir.join("load_order.toml");
        fs::write(&path, r#"foo = "bar""#).unwrap();
        let result: Result<Vec<PluginEntryData>, _> = deserialize_list(&path, "files");
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));
        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_parse_error() {
        let dir = make_test_dir("parse_err");
        let path = dir.join("schemas.ron");
        fs::write(&path, "this is not valid RON {{{").unwrap();
        let result: Result<CatalogData, _> = deserialize_file(&path);
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));
        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // resolve_name / check_duplicate
    // -----------------------------------------------------------------------

    #[test]
    fn resolve_and_duplicate() {
        let mut map = HashMap::new();
        map.insert("Entry".to_string(), 7u32);
        assert_eq!(*resolve_name(&map, "Entry", Path::new("schemas.ron"), "layout").unwrap(), 7);
        assert!(matches!(
            resolve_name(&map, "Missing", Path::new("schemas.ron"), "layout"),
            Err(DataLoadError::UnresolvedRef { ref name, expected_kind: "layout", .. }) if name == "Missing"
        ));
        assert!(check_duplicate(&map, "Other", Path::new("schemas.ron")).is_ok());
        assert!(matches!(
            check_duplicate(&map, "Entry", Path::new("schemas.ron")),
            Err(DataLoadError::DuplicateName { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // load_stack
    // -----------------------------------------------------------------------

    #[test]
    fn load_stack_with_empty_files() {
        let dir = make_test_dir("stack_empty");
        fs::write(dir.join("schemas.ron"), GLOBAL_SCHEMAS).unwrap();
        fs::write(
            dir.join("load_order.ron"),
            r#"[(name: "A.esm"), (name: "B.esp", masters: ["A.esm"]), (name: "C.esp", masters: ["a.esm"], scan_only: true)]"#,
        )
        .unwrap();
        fs::write(dir.join("collection.toml"), "max_history = 8").unwrap();

        let coll = load_stack(&dir).unwrap();
        assert_eq!(coll.load_order().len(), 3);
        assert_eq!(coll.config().max_history, 8);
        assert_eq!(coll.registry().schema_count(), 1);
        let c = coll.file_by_name(&FileName::new("C.esp")).unwrap();
        assert!(coll.file(c).unwrap().scan_only);
        cleanup(&dir);
    }

    #[test]
    fn load_stack_reads_plugins() {
        let dir = make_test_dir("stack_plugins");
        let (mut source, files) = stack(&[("A.esm", false)]);
        global(&mut source, files[0], 0x30);
        fs::write(dir.join("A.esm.bin"), serialize_plugin(&mut source, files[0]).unwrap()).unwrap();
        fs::write(dir.join("schemas.ron"), GLOBAL_SCHEMAS).unwrap();
        fs::write(
            dir.join("load_order.json"),
            r#"[{"name": "A.esm", "plugin": "A.esm.bin"}, {"name": "B.esp", "masters": ["A.esm"]}]"#,
        )
        .unwrap();

        let coll = load_stack(&dir).unwrap();
        let a = coll.file_by_name(&FileName::new("A.esm")).unwrap();
        let g = coll.lookup(a, &FormId::new("A.esm", 0x30)).unwrap();
        assert!(g.get(&coll, "editor_id").is_ok());
        cleanup(&dir);
    }

    #[test]
    fn load_stack_rejects_late_master() {
        let dir = make_test_dir("stack_late_master");
        fs::write(dir.join("schemas.ron"), GLOBAL_SCHEMAS).unwrap();
        fs::write(
            dir.join("load_order.ron"),
            r#"[(name: "B.esp", masters: ["A.esm"]), (name: "A.esm")]"#,
        )
        .unwrap();
        assert!(matches!(load_stack(&dir), Err(DataLoadError::MissingMaster { .. })));
        cleanup(&dir);
    }

    #[test]
    fn load_stack_rejects_renamed_plugin() {
        let dir = make_test_dir("stack_renamed");
        let (mut source, files) = stack(&[("A.esm", false)]);
        fs::write(dir.join("a.bin"), serialize_plugin(&mut source, files[0]).unwrap()).unwrap();
        fs::write(dir.join("schemas.ron"), GLOBAL_SCHEMAS).unwrap();
        fs::write(dir.join("load_order.ron"), r#"[(name: "Other.esm", plugin: Some("a.bin"))]"#).unwrap();
        assert!(matches!(load_stack(&dir), Err(DataLoadError::NameMismatch { .. })));
        cleanup(&dir);
    }

    #[test]
    fn load_stack_requires_schemas() {
        let dir = make_test_dir("stack_no_schemas");
        fs::write(dir.join("load_order.ron"), "[]").unwrap();
        assert!(matches!(load_stack(&dir), Err(DataLoadError::MissingRequired { .. })));
        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // Error display messages
    // -----------------------------------------------------------------------

    #[test]
    fn error_display_messages() {
        let e = DataLoadError::MissingRequired {
            file: "schemas".to_string(),
            dir: PathBuf::from("/data"),
        };
        assert!(e.to_string().contains("schemas"));
        assert!(e.to_string().contains("/data"));

        let e = DataLoadError::MissingMaster {
            plugin: "B.esp".to_string(),
            master: "A.esm".to_string(),
        };
        assert!(e.to_string().contains("A.esm"));

        let e = DataLoadError::InvalidTag {
            file: PathBuf::from("schemas.ron"),
            tag: "TOOLONG".to_string(),
        };
        assert!(e.to_string().contains("TOOLONG"));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let data_err: DataLoadError = io_err.into();
        assert!(matches!(data_err, DataLoadError::Io(_)));
        assert!(data_err.to_string().contains("file not found"));
    }
}
