//! Run metadata: provenance, extractor output and file manifests.
//!
//! A successful run's metadata is assembled in a fixed order:
//!
//! 1. Provenance: the trigger's map is updated, or its list is appended to,
//!    with this run's entries. The two forms are never mixed.
//! 2. The pipeline [`Extractor`]'s record.
//! 3. The [`FileManifest`] description of the dataset directory.

pub mod extractor;
pub mod manifest;
pub mod provenance;
pub mod record;

pub use extractor::{Extractor, NoopExtractor, TriggerMetadataExtractor, YamlResultExtractor, METADATA_KEY};
pub use manifest::{FileManifest, ManifestEntry, MANIFEST_FILE};
pub use provenance::{
    merge_provenance, run_entries, sha256_file, ProvenanceEntry, ENGINE_VERSION,
    PROVENANCE_LIST_KEY, PROVENANCE_MAP_KEY,
};
pub use record::MetadataRecord;
