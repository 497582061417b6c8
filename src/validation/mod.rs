//! Metadata schema validation.
//!
//! A successful run's metadata record is validated as a whole before it is
//! reported. A violation downgrades the report to `Error`.

pub mod schema_validator;

pub use schema_validator::{
    ErrorSeverity, MetadataSchema, SchemaError, SchemaValidationResult, EMBEDDED_SCHEMA,
};
