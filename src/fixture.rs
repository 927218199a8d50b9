//! Fixture descriptor files.
//!
//! ```json
//! {
//!   "model": "people",
//!   "collection": "people",
//!   "fixtures": [ { "name": "Jhon Snow" }, { "name": "Tyrion Lannister" } ]
//! }
//! ```
//!
//! `collection` is optional and defaults to `model`. Records are relaxed
//! MongoDB extended JSON, so `{"$oid": "..."}` and `{"$date": "..."}` values
//! are inserted as their BSON types.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension of fixture descriptor files.
pub const FIXTURE_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to read fixture file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be converted to BSON.
    #[error("Fixture record {index} of model '{model}' is not valid extended JSON: {source}")]
    Record {
        model: String,
        index: usize,
        #[source]
        source: bson::extjson::de::Error,
    },

    /// A record converted to a BSON value that is not a document.
    #[error("Fixture record {index} of model '{model}' is not a document")]
    NotADocument { model: String, index: usize },

    #[error("Failed to list fixtures in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed contents of one fixture file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDescriptor {
    /// Target model identifier
    pub model: String,
    /// Explicit collection name, when it differs from `model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Records inserted verbatim, in order
    pub fixtures: Vec<Map<String, Value>>,
}

impl FixtureDescriptor {
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.model)
    }

    /// Convert the records to BSON documents.
    pub fn documents(&self) -> Result<Vec<Document>, FixtureError> {
        self.fixtures
            .iter()
            .enumerate()
            .map(|(index, record)| {
                match Bson::try_from(Value::Object(record.clone())) {
                    Ok(Bson::Document(document)) => Ok(document),
                    Ok(_) => Err(FixtureError::NotADocument {
                        model: self.model.clone(),
                        index,
                    }),
                    Err(source) => Err(FixtureError::Record {
                        model: self.model.clone(),
                        index,
                        source,
                    }),
                }
            })
            .collect()
    }
}

/// `<dir>/<name>.json`
pub fn fixture_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{FIXTURE_EXTENSION}"))
}

pub fn parse_descriptor(path: &Path, contents: &str) -> Result<FixtureDescriptor, FixtureError> {
    serde_json::from_str(contents).map_err(|source| FixtureError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and parse `<dir>/<name>.json`. Nothing is cached; every call hits
/// the filesystem.
pub async fn read_descriptor(dir: &Path, name: &str) -> Result<FixtureDescriptor, FixtureError> {
    let path = fixture_path(dir, name);
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| FixtureError::Read {
            path: path.clone(),
            source,
        })?;

    let descriptor = parse_descriptor(&path, &contents)?;
    tracing::debug!(
        "Read fixture [{}] from {}: {} records for '{}'",
        name,
        path.display(),
        descriptor.fixtures.len(),
        descriptor.collection_name()
    );
    Ok(descriptor)
}

/// Names of the fixture files in `dir` (non-recursive), sorted.
pub async fn list_fixtures(dir: &Path) -> Result<Vec<String>, FixtureError> {
    let list_err = |source| FixtureError::List {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(FIXTURE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(stem.to_string());
        }
    }

    names.sort();
    Ok(names)
}
