//! File manifests describing a dataset directory.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use super::provenance::sha256_file;
use crate::error::MetadataError;

/// File name of the manifest kept next to a workflow descriptor.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One manifest rule as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub pattern: String,
    pub description: String,
    #[serde(default)]
    pub edam_ontology_term: Option<String>,
    #[serde(default)]
    pub is_qa_qc: Option<bool>,
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    regex: Regex,
    entry: ManifestEntry,
}

/// Ordered manifest rules; the first matching pattern describes a file.
#[derive(Debug, Clone, Default)]
pub struct FileManifest {
    entries: Vec<CompiledEntry>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifests that sit next to the given descriptors.
    ///
    /// Descriptors without a manifest contribute nothing.
    pub fn for_descriptors(descriptors: &[PathBuf]) -> Result<Self, MetadataError> {
        let mut manifest = Self::new();
        for descriptor in descriptors {
            let path = descriptor
                .parent()
                .map(|dir| dir.join(MANIFEST_FILE))
                .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE));
            if path.is_file() {
                manifest.load(&path)?;
            } else {
                debug!(descriptor = %descriptor.display(), "No manifest for descriptor");
            }
        }
        Ok(manifest)
    }

    /// Appends the rules from a manifest file.
    pub fn load(&mut self, path: &Path) -> Result<(), MetadataError> {
        let text = fs::read_to_string(path)?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(&text).map_err(|e| MetadataError::InvalidManifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        for entry in entries {
            self.push(entry).map_err(|reason| MetadataError::InvalidManifest {
                path: path.to_path_buf(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Adds one rule. Patterns match from the start of the relative path.
    pub fn push(&mut self, entry: ManifestEntry) -> Result<(), String> {
        let regex = Regex::new(&format!("^(?:{})", entry.pattern))
            .map_err(|e| format!("bad pattern '{}': {}", entry.pattern, e))?;
        self.entries.push(CompiledEntry { regex, entry });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn describe(&self, rel_path: &str) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|c| c.regex.is_match(rel_path))
            .map(|c| &c.entry)
    }

    /// Describes every file under `root` as `{"files": [...]}`.
    ///
    /// Files are listed in path order with their relative path, type, size and
    /// sha256 digest, plus the description of the first matching rule.
    pub fn describe_directory(&self, root: &Path) -> Result<Map<String, Value>, MetadataError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                MetadataError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let size = entry.metadata().map_err(|e| {
                MetadataError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
                )
            })?;

            let mut record = Map::new();
            record.insert("rel_path".to_string(), Value::String(rel_path.clone()));
            record.insert("filetype".to_string(), Value::String(file_type(entry.path())));
            record.insert("size".to_string(), Value::from(size.len()));
            record.insert(
                "sha256".to_string(),
                Value::String(sha256_file(entry.path())?),
            );

            if let Some(rule) = self.describe(&rel_path) {
                record.insert(
                    "description".to_string(),
                    Value::String(rule.description.clone()),
                );
                if let Some(term) = &rule.edam_ontology_term {
                    record.insert("edam_term".to_string(), Value::String(term.clone()));
                }
                if let Some(is_qa_qc) = rule.is_qa_qc {
                    record.insert("is_qa_qc".to_string(), Value::Bool(is_qa_qc));
                }
            }

            files.push(Value::Object(record));
        }

        let mut out = Map::new();
        out.insert("files".to_string(), Value::Array(files));
        Ok(out)
    }
}

/// Lower-cased extension, or `unknown`.
fn file_type(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}
