//! Schema validation for run metadata.
//!
//! Schemas are declarative YAML documents using the subset of JSON Schema the
//! metadata schemata need: `type`, `required`, `properties`,
//! `additionalProperties`, `items`, `minItems`, `enum`, `minimum`, `pattern`
//! and `anyOf`. Unknown keywords such as `title` or `$schema` are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SchemaLoadError;

/// Schema compiled into the binary, used when no schema file is configured.
pub const EMBEDDED_SCHEMA: &str = include_str!("../../schemata/dataset_metadata_schema.yml");

/// Result of validating a document against a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaValidationResult {
    /// Whether the document passes all required validations.
    pub valid: bool,
    /// Violations, in document order.
    pub errors: Vec<SchemaError>,
    /// Non-critical findings.
    pub warnings: Vec<String>,
}

impl SchemaValidationResult {
    /// Create a new valid result with no errors or warnings.
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(SchemaError {
            field: field.into(),
            message: message.into(),
            severity: ErrorSeverity::Error,
        });
        self.valid = false;
    }

    /// Add a warning to the result.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn absorb(&mut self, other: SchemaValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// All violations on one line, e.g. `files[0].size: -1 is less than the minimum of 0`.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A schema violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaError {
    /// Path of the offending value, empty for the document root.
    pub field: String,
    /// Description of the violation.
    pub message: String,
    /// Severity of the error.
    pub severity: ErrorSeverity,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Severity level for schema errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Critical error that must be fixed.
    Error,
    /// Warning that doesn't block validation.
    Warning,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeSpec {
    One(String),
    Many(Vec<String>),
}

impl TypeSpec {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<SchemaNode>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaNode {
    #[serde(rename = "type", default)]
    types: Option<TypeSpec>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, SchemaNode>,
    #[serde(default)]
    additional_properties: Option<AdditionalProperties>,
    #[serde(default)]
    items: Option<Box<SchemaNode>>,
    #[serde(default)]
    min_items: Option<usize>,
    #[serde(rename = "enum", default)]
    enum_values: Option<Vec<Value>>,
    #[serde(default)]
    minimum: Option<f64>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    any_of: Vec<SchemaNode>,
    #[serde(skip)]
    compiled_pattern: Option<Regex>,
}

impl SchemaNode {
    fn compile(&mut self, field: &str) -> Result<(), SchemaLoadError> {
        if let Some(pattern) = &self.pattern {
            let regex = Regex::new(pattern).map_err(|e| SchemaLoadError::InvalidPattern {
                field: field.to_string(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            self.compiled_pattern = Some(regex);
        }
        for (name, child) in self.properties.iter_mut() {
            child.compile(&join_field(field, name))?;
        }
        if let Some(AdditionalProperties::Schema(child)) = self.additional_properties.as_mut() {
            child.compile(&format!("{}.*", field))?;
        }
        if let Some(items) = self.items.as_mut() {
            items.compile(&format!("{}[]", field))?;
        }
        for alternative in self.any_of.iter_mut() {
            alternative.compile(field)?;
        }
        Ok(())
    }

    fn validate(&self, value: &Value, field: &str) -> SchemaValidationResult {
        let mut result = SchemaValidationResult::valid();

        if let Some(types) = &self.types {
            let names = types.names();
            if !names.iter().any(|t| type_matches(t, value)) {
                result.add_error(
                    field,
                    format!("{} is not of type {}", short(value), names.join(" or ")),
                );
                // nothing below applies to a value of the wrong type
                return result;
            }
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                result.add_error(field, format!("{} is not one of the allowed values", short(value)));
            }
        }

        match value {
            Value::Object(map) => {
                for key in &self.required {
                    if !map.contains_key(key) {
                        result.add_error(field, format!("'{}' is a required property", key));
                    }
                }
                for (key, child) in map {
                    let child_field = join_field(field, key);
                    match (self.properties.get(key), &self.additional_properties) {
                        (Some(schema), _) => result.absorb(schema.validate(child, &child_field)),
                        (None, Some(AdditionalProperties::Schema(schema))) => {
                            result.absorb(schema.validate(child, &child_field))
                        }
                        (None, Some(AdditionalProperties::Allowed(false))) => {
                            result.add_error(field, format!("additional property '{}' is not allowed", key))
                        }
                        (None, _) => {}
                    }
                }
            }
            Value::Array(items) => {
                if let Some(min) = self.min_items {
                    if items.len() < min {
                        result.add_error(field, format!("expected at least {} items, found {}", min, items.len()));
                    }
                }
                if let Some(schema) = &self.items {
                    for (idx, item) in items.iter().enumerate() {
                        result.absorb(schema.validate(item, &format!("{}[{}]", field, idx)));
                    }
                }
            }
            Value::Number(n) => {
                if let (Some(min), Some(actual)) = (self.minimum, n.as_f64()) {
                    if actual < min {
                        result.add_error(field, format!("{} is less than the minimum of {}", n, min));
                    }
                }
            }
            Value::String(s) => {
                if let Some(regex) = &self.compiled_pattern {
                    if !regex.is_match(s) {
                        result.add_error(field, format!("{} does not match '{}'", short(value), regex.as_str()));
                    }
                }
            }
            _ => {}
        }

        if !self.any_of.is_empty() && !self.any_of.iter().any(|alt| alt.validate(value, field).valid) {
            let alternatives: Vec<String> = self
                .any_of
                .iter()
                .flat_map(|alt| alt.validate(value, field).errors)
                .map(|e| e.message)
                .collect();
            result.add_error(
                field,
                format!("does not match any allowed schema ({})", alternatives.join(", ")),
            );
        }

        result
    }
}

fn join_field(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => false,
    }
}

/// Compact rendering of a value for messages.
fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        format!("{}...", text.chars().take(57).collect::<String>())
    } else {
        text
    }
}

/// A compiled metadata schema.
#[derive(Debug, Clone)]
pub struct MetadataSchema {
    root: SchemaNode,
}

impl MetadataSchema {
    /// Parses a schema from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaLoadError> {
        let mut root: SchemaNode = serde_yaml::from_str(text)?;
        root.compile("")?;
        Ok(Self { root })
    }

    /// Reads a schema file.
    pub fn from_file(path: &Path) -> Result<Self, SchemaLoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// The schema compiled into the binary.
    pub fn embedded() -> Result<Self, SchemaLoadError> {
        Self::from_yaml_str(EMBEDDED_SCHEMA)
    }

    /// Loads `path` if given, the embedded schema otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, SchemaLoadError> {
        match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading metadata schema");
                Self::from_file(path)
            }
            None => Self::embedded(),
        }
    }

    /// Validates a document.
    pub fn validate(&self, document: &Value) -> SchemaValidationResult {
        self.root.validate(document, "")
    }
}
