//! The merged metadata record.

use serde::Serialize;
use serde_json::{Map, Value};

/// Metadata assembled for a successful run.
///
/// Built in a fixed order: provenance, then extractor output, then the file
/// manifest. A later part overwrites keys of an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetadataRecord(Map<String, Value>);

impl MetadataRecord {
    pub fn assemble(
        provenance: (&str, Value),
        extracted: Map<String, Value>,
        manifest: Map<String, Value>,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert(provenance.0.to_string(), provenance.1);
        fields.extend(extracted);
        fields.extend(manifest);
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
