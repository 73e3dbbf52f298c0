//! Error types for the record cache.

use crate::{ModelName, RecordId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the record cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema validation errors
    #[error("model not defined: {0}")]
    ModelNotDefined(ModelName),

    #[error("attribute '{attribute}' not defined for model '{model}'")]
    AttributeNotDefined { model: ModelName, attribute: String },

    #[error("key '{key}' not defined for model '{model}'")]
    KeyNotDefined { model: ModelName, key: String },

    #[error("relationship '{relationship}' not defined for model '{model}'")]
    RelationshipNotDefined {
        model: ModelName,
        relationship: String,
    },

    #[error("invalid record identity: {0}")]
    InvalidIdentity(String),

    #[error("relationship '{model}.{relationship}' is not a {expected} relationship")]
    RelationshipKindMismatch {
        model: ModelName,
        relationship: String,
        expected: String,
    },

    #[error("relationship '{model}.{relationship}' expects model '{expected}', got '{got}'")]
    RelatedModelMismatch {
        model: ModelName,
        relationship: String,
        expected: ModelName,
        got: ModelName,
    },

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Schema errors
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },

    #[error("schema downgrade from version {current} to {proposed}")]
    SchemaDowngrade {
        current: SchemaVersion,
        proposed: SchemaVersion,
    },

    // Query errors
    #[error("record not found: {record_type}:{id}")]
    RecordNotFound { record_type: ModelName, id: RecordId },

    #[error("Unable to find operator: {0}")]
    UnknownQueryOperator(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
