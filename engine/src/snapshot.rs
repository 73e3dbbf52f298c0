//! Snapshot types for exporting and restoring cache state.
//!
//! A snapshot holds every record of a cache, grouped by model. Relationship
//! indices are derived data and are rebuilt on import rather than stored.
//! Serialization is deterministic so equal caches export equal JSON.

use crate::{
    error::Result, processors::validate_record, Error, ModelName, Record, RecordId, Schema,
    SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of cache records.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// All records organized by model, then by record ID
    pub records: BTreeMap<ModelName, BTreeMap<RecordId, Record>>,
}

impl CacheSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            records: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, record: Record) {
        self.records
            .entry(record.record_type.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Get a record from the snapshot.
    pub fn get_record(&self, record_type: &str, id: &str) -> Option<&Record> {
        self.records.get(record_type)?.get(id)
    }

    /// Count total records across all models.
    pub fn record_count(&self) -> usize {
        self.records.values().map(|r| r.len()).sum()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (model_name, records) in &self.records {
            let model = schema.model(model_name)?;
            for (id, record) in records {
                if record.record_type != *model_name || record.id != *id {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {}:{} stored under {}:{}",
                        record.record_type, record.id, model_name, id
                    )));
                }
                validate_record(model, record)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version
    pub schema_version: SchemaVersion,
    /// Number of models holding records
    pub model_count: usize,
    /// Total record count
    pub record_count: usize,
}

impl From<&CacheSnapshot> for SnapshotMetadata {
    fn from(snapshot: &CacheSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            model_count: snapshot.records.len(),
            record_count: snapshot.record_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldType, ModelDef, RecordIdentity, RelationshipDef};
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1)
            .with_model(
                "planet",
                ModelDef::new()
                    .with_attribute("name", FieldType::String)
                    .with_relationship("moons", RelationshipDef::has_many("moon")),
            )
            .with_model("moon", ModelDef::new())
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = CacheSnapshot::new(1);
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn add_and_get_record() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(Record::new("planet", "earth").with_attribute("name", json!("Earth")));

        assert_eq!(snapshot.record_count(), 1);
        let retrieved = snapshot.get_record("planet", "earth").unwrap();
        assert_eq!(retrieved.attribute("name"), Some(&json!("Earth")));
        assert!(snapshot.get_record("moon", "earth").is_none());
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(
            Record::new("planet", "earth")
                .with_attribute("name", json!("Earth"))
                .with_has_many("moons", [RecordIdentity::new("moon", "luna")]),
        );
        snapshot.add_record(Record::new("moon", "luna"));

        let json = snapshot.to_json().unwrap();
        let restored = CacheSnapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
    }

    #[test]
    fn deterministic_serialization() {
        let mut snapshot1 = CacheSnapshot::new(1);
        let mut snapshot2 = CacheSnapshot::new(1);

        snapshot1.add_record(Record::new("planet", "earth"));
        snapshot1.add_record(Record::new("planet", "mars"));

        // Add in reverse order
        snapshot2.add_record(Record::new("planet", "mars"));
        snapshot2.add_record(Record::new("planet", "earth"));

        assert_eq!(snapshot1.to_json().unwrap(), snapshot2.to_json().unwrap());
    }

    #[test]
    fn validate_snapshot_success() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(Record::new("planet", "earth").with_attribute("name", json!("Earth")));
        assert!(snapshot.validate(&test_schema()).is_ok());
    }

    #[test]
    fn validate_snapshot_schema_version_mismatch() {
        let snapshot = CacheSnapshot::new(99);
        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::SchemaVersionMismatch { .. })));
    }

    #[test]
    fn validate_snapshot_unknown_model() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(Record::new("star", "sol"));
        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::ModelNotDefined(_))));
    }

    #[test]
    fn validate_snapshot_invalid_attribute() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(Record::new("planet", "earth").with_attribute("name", json!(123)));
        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn validate_snapshot_misfiled_record() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot
            .records
            .entry("planet".into())
            .or_default()
            .insert("mars".into(), Record::new("planet", "earth"));
        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn snapshot_metadata() {
        let mut snapshot = CacheSnapshot::new(1);
        snapshot.add_record(Record::new("planet", "earth"));
        snapshot.add_record(Record::new("moon", "luna"));

        let metadata: SnapshotMetadata = (&snapshot).into();
        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(metadata.schema_version, 1);
        assert_eq!(metadata.model_count, 2);
        assert_eq!(metadata.record_count, 2);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "schemaVersion": 1,
            "records": {}
        }"#;

        let result = CacheSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
