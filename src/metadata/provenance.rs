//! Provenance entries for a run.

use std::fs::File;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::context::Provenance;

/// Version tag recorded for the engine itself.
pub const ENGINE_VERSION: &str = concat!("ingestflow-", env!("CARGO_PKG_VERSION"));

/// Key carrying map-form provenance.
pub const PROVENANCE_MAP_KEY: &str = "dag_provenance";
/// Key carrying list-form provenance.
pub const PROVENANCE_LIST_KEY: &str = "dag_provenance_list";

/// One provenance fact: something that ran, and which version of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceEntry {
    pub origin: String,
    pub version: String,
}

impl ProvenanceEntry {
    pub fn new(origin: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            version: version.into(),
        }
    }

    /// `"{origin} {version}"`, the list-form rendering.
    pub fn to_list_entry(&self) -> String {
        format!("{} {}", self.origin, self.version)
    }

    /// Entry for a descriptor file, versioned by its content digest.
    ///
    /// Unreadable files are recorded as `unavailable`.
    pub fn for_file(path: &Path) -> Self {
        let origin = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        match sha256_file(path) {
            Ok(digest) => Self::new(origin, format!("sha256:{}", digest)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot hash provenance file");
                Self::new(origin, "unavailable")
            }
        }
    }
}

/// This run's entries: the pipeline itself, then each descriptor file in order.
pub fn run_entries(pipeline: &str, files: &[impl AsRef<Path>]) -> Vec<ProvenanceEntry> {
    std::iter::once(ProvenanceEntry::new(pipeline, ENGINE_VERSION))
        .chain(files.iter().map(|f| ProvenanceEntry::for_file(f.as_ref())))
        .collect()
}

/// Merges new entries into upstream provenance, preserving its form.
///
/// Maps are updated in place; lists keep every upstream entry unmodified and
/// gain the new entries at the end. Returns the metadata key and value.
pub fn merge_provenance(upstream: &Provenance, entries: &[ProvenanceEntry]) -> (&'static str, Value) {
    match upstream {
        Provenance::Map(map) => {
            let mut merged = map.clone();
            for entry in entries {
                merged.insert(entry.origin.clone(), Value::String(entry.version.clone()));
            }
            (PROVENANCE_MAP_KEY, Value::Object(merged))
        }
        Provenance::List(list) => {
            let mut merged = list.clone();
            merged.extend(entries.iter().map(|e| Value::String(e.to_list_entry())));
            (PROVENANCE_LIST_KEY, Value::Array(merged))
        }
    }
}

/// Hex sha256 digest of a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
