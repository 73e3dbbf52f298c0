//! Operation types for expressing changes.
//!
//! Changes are expressed as operations, not direct mutations. Every operation
//! targets a single record; the cache derives an inverse for each one so a
//! batch can be undone by replaying the inverses.

use crate::{Record, RecordIdentity};
use serde::{Deserialize, Serialize};

/// A single mutation against the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RecordOperation {
    /// Insert a record as-is, replacing any record with the same identity
    AddRecord { record: Record },
    /// Merge a record into the current one, or insert it if absent
    ReplaceRecord { record: Record },
    /// Remove a record
    RemoveRecord { record: RecordIdentity },
    /// Set or clear (`None`) a single key
    ReplaceKey {
        record: RecordIdentity,
        key: String,
        value: Option<String>,
    },
    /// Set a single attribute; `null` clears it
    ReplaceAttribute {
        record: RecordIdentity,
        attribute: String,
        value: serde_json::Value,
    },
    /// Append to a to-many relationship
    #[serde(rename_all = "camelCase")]
    AddToRelatedRecords {
        record: RecordIdentity,
        relationship: String,
        related_record: RecordIdentity,
    },
    /// Remove from a to-many relationship
    #[serde(rename_all = "camelCase")]
    RemoveFromRelatedRecords {
        record: RecordIdentity,
        relationship: String,
        related_record: RecordIdentity,
    },
    /// Overwrite a to-many relationship
    #[serde(rename_all = "camelCase")]
    ReplaceRelatedRecords {
        record: RecordIdentity,
        relationship: String,
        related_records: Vec<RecordIdentity>,
    },
    /// Overwrite a to-one relationship
    #[serde(rename_all = "camelCase")]
    ReplaceRelatedRecord {
        record: RecordIdentity,
        relationship: String,
        related_record: Option<RecordIdentity>,
    },
}

impl RecordOperation {
    pub fn add_record(record: Record) -> Self {
        RecordOperation::AddRecord { record }
    }

    pub fn replace_record(record: Record) -> Self {
        RecordOperation::ReplaceRecord { record }
    }

    pub fn remove_record(record: impl Into<RecordIdentity>) -> Self {
        RecordOperation::RemoveRecord {
            record: record.into(),
        }
    }

    pub fn replace_key(
        record: impl Into<RecordIdentity>,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        RecordOperation::ReplaceKey {
            record: record.into(),
            key: key.into(),
            value,
        }
    }

    pub fn replace_attribute(
        record: impl Into<RecordIdentity>,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        RecordOperation::ReplaceAttribute {
            record: record.into(),
            attribute: attribute.into(),
            value,
        }
    }

    pub fn add_to_related_records(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: impl Into<RecordIdentity>,
    ) -> Self {
        RecordOperation::AddToRelatedRecords {
            record: record.into(),
            relationship: relationship.into(),
            related_record: related_record.into(),
        }
    }

    pub fn remove_from_related_records(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: impl Into<RecordIdentity>,
    ) -> Self {
        RecordOperation::RemoveFromRelatedRecords {
            record: record.into(),
            relationship: relationship.into(),
            related_record: related_record.into(),
        }
    }

    pub fn replace_related_records(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_records: impl IntoIterator<Item = RecordIdentity>,
    ) -> Self {
        RecordOperation::ReplaceRelatedRecords {
            record: record.into(),
            relationship: relationship.into(),
            related_records: related_records.into_iter().collect(),
        }
    }

    pub fn replace_related_record(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: Option<RecordIdentity>,
    ) -> Self {
        RecordOperation::ReplaceRelatedRecord {
            record: record.into(),
            relationship: relationship.into(),
            related_record,
        }
    }

    /// Wire name of the operation kind.
    pub fn op_name(&self) -> &'static str {
        match self {
            RecordOperation::AddRecord { .. } => "addRecord",
            RecordOperation::ReplaceRecord { .. } => "replaceRecord",
            RecordOperation::RemoveRecord { .. } => "removeRecord",
            RecordOperation::ReplaceKey { .. } => "replaceKey",
            RecordOperation::ReplaceAttribute { .. } => "replaceAttribute",
            RecordOperation::AddToRelatedRecords { .. } => "addToRelatedRecords",
            RecordOperation::RemoveFromRelatedRecords { .. } => "removeFromRelatedRecords",
            RecordOperation::ReplaceRelatedRecords { .. } => "replaceRelatedRecords",
            RecordOperation::ReplaceRelatedRecord { .. } => "replaceRelatedRecord",
        }
    }

    /// Model of the target record.
    pub fn record_type(&self) -> &str {
        match self {
            RecordOperation::AddRecord { record } | RecordOperation::ReplaceRecord { record } => {
                &record.record_type
            }
            RecordOperation::RemoveRecord { record }
            | RecordOperation::ReplaceKey { record, .. }
            | RecordOperation::ReplaceAttribute { record, .. }
            | RecordOperation::AddToRelatedRecords { record, .. }
            | RecordOperation::RemoveFromRelatedRecords { record, .. }
            | RecordOperation::ReplaceRelatedRecords { record, .. }
            | RecordOperation::ReplaceRelatedRecord { record, .. } => &record.record_type,
        }
    }

    /// Id of the target record.
    pub fn record_id(&self) -> &str {
        match self {
            RecordOperation::AddRecord { record } | RecordOperation::ReplaceRecord { record } => {
                &record.id
            }
            RecordOperation::RemoveRecord { record }
            | RecordOperation::ReplaceKey { record, .. }
            | RecordOperation::ReplaceAttribute { record, .. }
            | RecordOperation::AddToRelatedRecords { record, .. }
            | RecordOperation::RemoveFromRelatedRecords { record, .. }
            | RecordOperation::ReplaceRelatedRecords { record, .. }
            | RecordOperation::ReplaceRelatedRecord { record, .. } => &record.id,
        }
    }

    /// Identity of the target record.
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(self.record_type(), self.record_id())
    }

    /// Relationship named by a relationship operation.
    pub fn relationship(&self) -> Option<&str> {
        match self {
            RecordOperation::AddToRelatedRecords { relationship, .. }
            | RecordOperation::RemoveFromRelatedRecords { relationship, .. }
            | RecordOperation::ReplaceRelatedRecords { relationship, .. }
            | RecordOperation::ReplaceRelatedRecord { relationship, .. } => Some(relationship),
            _ => None,
        }
    }
}

/// Builder handed to `Cache::patch_with`.
///
/// Mirrors the constructors on [`RecordOperation`] so callers can write
/// `cache.patch_with(|t| t.add_record(planet))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformBuilder;

impl TransformBuilder {
    pub fn add_record(&self, record: Record) -> RecordOperation {
        RecordOperation::add_record(record)
    }

    pub fn replace_record(&self, record: Record) -> RecordOperation {
        RecordOperation::replace_record(record)
    }

    pub fn remove_record(&self, record: impl Into<RecordIdentity>) -> RecordOperation {
        RecordOperation::remove_record(record)
    }

    pub fn replace_key(
        &self,
        record: impl Into<RecordIdentity>,
        key: impl Into<String>,
        value: Option<String>,
    ) -> RecordOperation {
        RecordOperation::replace_key(record, key, value)
    }

    pub fn replace_attribute(
        &self,
        record: impl Into<RecordIdentity>,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> RecordOperation {
        RecordOperation::replace_attribute(record, attribute, value)
    }

    pub fn add_to_related_records(
        &self,
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: impl Into<RecordIdentity>,
    ) -> RecordOperation {
        RecordOperation::add_to_related_records(record, relationship, related_record)
    }

    pub fn remove_from_related_records(
        &self,
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: impl Into<RecordIdentity>,
    ) -> RecordOperation {
        RecordOperation::remove_from_related_records(record, relationship, related_record)
    }

    pub fn replace_related_records(
        &self,
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_records: impl IntoIterator<Item = RecordIdentity>,
    ) -> RecordOperation {
        RecordOperation::replace_related_records(record, relationship, related_records)
    }

    pub fn replace_related_record(
        &self,
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
        related_record: Option<RecordIdentity>,
    ) -> RecordOperation {
        RecordOperation::replace_related_record(record, relationship, related_record)
    }
}

/// Anything `Cache::patch` accepts: one operation or an ordered batch.
pub trait IntoOperations {
    fn into_operations(self) -> Vec<RecordOperation>;
}

impl IntoOperations for RecordOperation {
    fn into_operations(self) -> Vec<RecordOperation> {
        vec![self]
    }
}

impl IntoOperations for Vec<RecordOperation> {
    fn into_operations(self) -> Vec<RecordOperation> {
        self
    }
}

impl IntoOperations for &[RecordOperation] {
    fn into_operations(self) -> Vec<RecordOperation> {
        self.to_vec()
    }
}

impl<const N: usize> IntoOperations for [RecordOperation; N] {
    fn into_operations(self) -> Vec<RecordOperation> {
        self.into_iter().collect()
    }
}
