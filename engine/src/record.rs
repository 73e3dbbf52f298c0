//! Record types for storing data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The `(type, id)` pair that identifies a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    /// Model name
    #[serde(rename = "type")]
    pub record_type: String,
    /// Primary id, unique within the model
    pub id: String,
}

impl RecordIdentity {
    /// Create a new identity.
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
        }
    }

    /// Both halves must be non-empty.
    pub fn is_valid(&self) -> bool {
        !self.record_type.is_empty() && !self.id.is_empty()
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_type, self.id)
    }
}

impl From<&Record> for RecordIdentity {
    fn from(record: &Record) -> Self {
        record.identity()
    }
}

impl From<&RecordIdentity> for RecordIdentity {
    fn from(identity: &RecordIdentity) -> Self {
        identity.clone()
    }
}

/// The value of a single relationship on a record.
///
/// Serialized untagged: a JSON array is to-many, an object or `null` is to-one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    /// Members of a to-many relationship, in insertion order
    Many(Vec<RecordIdentity>),
    /// Target of a to-one relationship, if any
    One(Option<RecordIdentity>),
}

impl RelationshipData {
    /// Iterate over every identity referenced by this value.
    pub fn identities(&self) -> impl Iterator<Item = &RecordIdentity> + '_ {
        let (many, one): (&[RecordIdentity], Option<&RecordIdentity>) = match self {
            RelationshipData::Many(records) => (records, None),
            RelationshipData::One(record) => (&[], record.as_ref()),
        };
        many.iter().chain(one)
    }

    /// Check if an identity is referenced.
    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        self.identities().any(|r| r == identity)
    }

    /// True for an empty list or an unset to-one.
    pub fn is_empty(&self) -> bool {
        match self {
            RelationshipData::Many(records) => records.is_empty(),
            RelationshipData::One(record) => record.is_none(),
        }
    }
}

/// A record in the cache.
///
/// Records are values: every mutation produces a new `Record` rather than
/// editing one that is already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Model name
    #[serde(rename = "type")]
    pub record_type: String,
    /// Primary id
    pub id: String,
    /// Alternate identifiers assigned by external systems
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
    /// Attribute values by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Relationship values by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipData>,
}

impl Record {
    /// Create an empty record.
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            keys: BTreeMap::new(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Create an empty record carrying only an identity.
    pub fn from_identity(identity: &RecordIdentity) -> Self {
        Self::new(identity.record_type.clone(), identity.id.clone())
    }

    /// The identity of this record.
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(self.record_type.clone(), self.id.clone())
    }

    /// Builder-style method to set a key.
    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    /// Builder-style method to set an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Builder-style method to set a to-one relationship.
    pub fn with_has_one(
        mut self,
        name: impl Into<String>,
        related: Option<RecordIdentity>,
    ) -> Self {
        self.relationships
            .insert(name.into(), RelationshipData::One(related));
        self
    }

    /// Builder-style method to set a to-many relationship.
    pub fn with_has_many(
        mut self,
        name: impl Into<String>,
        related: impl IntoIterator<Item = RecordIdentity>,
    ) -> Self {
        self.relationships.insert(
            name.into(),
            RelationshipData::Many(related.into_iter().collect()),
        );
        self
    }

    /// Get an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Get a key value.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    /// Get a relationship value.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipData> {
        self.relationships.get(name)
    }

    /// Target of a to-one relationship.
    pub fn related_record(&self, name: &str) -> Option<&RecordIdentity> {
        match self.relationships.get(name) {
            Some(RelationshipData::One(related)) => related.as_ref(),
            _ => None,
        }
    }

    /// Members of a to-many relationship; empty if unset.
    pub fn related_records(&self, name: &str) -> &[RecordIdentity] {
        match self.relationships.get(name) {
            Some(RelationshipData::Many(related)) => related,
            _ => &[],
        }
    }
}

/// Merge an update into the current record.
///
/// Identity comes from `current`. For each grouping (keys, attributes,
/// relationships) the update's entries win per name; names only present on
/// one side are kept.
pub fn merge_records(current: &Record, update: &Record) -> Record {
    fn merge<V: Clone>(
        current: &BTreeMap<String, V>,
        update: &BTreeMap<String, V>,
    ) -> BTreeMap<String, V> {
        let mut merged = current.clone();
        merged.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    Record {
        record_type: current.record_type.clone(),
        id: current.id.clone(),
        keys: merge(&current.keys, &update.keys),
        attributes: merge(&current.attributes, &update.attributes),
        relationships: merge(&current.relationships, &update.relationships),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn planet(id: &str) -> RecordIdentity {
        RecordIdentity::new("planet", id)
    }

    fn moon(id: &str) -> RecordIdentity {
        RecordIdentity::new("moon", id)
    }

    #[test]
    fn create_record() {
        let record = Record::new("planet", "earth")
            .with_key("remoteId", "p-3")
            .with_attribute("name", json!("Earth"))
            .with_has_many("moons", [moon("luna")]);

        assert_eq!(record.identity(), planet("earth"));
        assert_eq!(record.key("remoteId"), Some("p-3"));
        assert_eq!(record.attribute("name"), Some(&json!("Earth")));
        assert_eq!(record.related_records("moons"), &[moon("luna")]);
        assert_eq!(record.related_record("moons"), None);
    }

    #[test]
    fn identity_validity() {
        assert!(planet("earth").is_valid());
        assert!(!RecordIdentity::new("", "earth").is_valid());
        assert!(!RecordIdentity::new("planet", "").is_valid());
        assert_eq!(planet("earth").to_string(), "planet:earth");
    }

    #[test]
    fn relationship_data_queries() {
        let many = RelationshipData::Many(vec![moon("a"), moon("b")]);
        assert!(many.contains(&moon("b")));
        assert_eq!(many.identities().count(), 2);
        assert!(!many.is_empty());

        let none = RelationshipData::One(None);
        assert!(none.is_empty());
        assert_eq!(none.identities().count(), 0);

        let one = RelationshipData::One(Some(planet("earth")));
        assert!(one.contains(&planet("earth")));
    }

    #[test]
    fn merge_keeps_fields_absent_from_update() {
        let current = Record::new("planet", "earth")
            .with_key("remoteId", "p-3")
            .with_attribute("name", json!("Earth"))
            .with_attribute("mass", json!(5.97))
            .with_has_many("moons", [moon("luna")]);

        let update = Record::new("planet", "earth")
            .with_attribute("name", json!("Terra"))
            .with_has_one("sun", Some(RecordIdentity::new("star", "sol")));

        let merged = merge_records(&current, &update);

        assert_eq!(merged.key("remoteId"), Some("p-3"));
        assert_eq!(merged.attribute("name"), Some(&json!("Terra")));
        assert_eq!(merged.attribute("mass"), Some(&json!(5.97)));
        assert_eq!(merged.related_records("moons"), &[moon("luna")]);
        assert_eq!(
            merged.related_record("sun"),
            Some(&RecordIdentity::new("star", "sol"))
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let current = Record::new("planet", "earth").with_attribute("name", json!("Earth"));
        let update = Record::new("planet", "earth")
            .with_attribute("classification", json!("terrestrial"))
            .with_has_many("moons", [moon("luna")]);

        let once = merge_records(&current, &update);
        let twice = merge_records(&once, &update);
        assert_eq!(once, twice);
    }

    #[test]
    fn serialization_format() {
        let record = Record::new("moon", "luna")
            .with_attribute("name", json!("Luna"))
            .with_has_one("planet", Some(planet("earth")));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "moon",
                "id": "luna",
                "attributes": {"name": "Luna"},
                "relationships": {"planet": {"type": "planet", "id": "earth"}}
            })
        );

        let parsed: Record = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn relationship_data_untagged() {
        let many: RelationshipData = serde_json::from_value(json!([])).unwrap();
        assert_eq!(many, RelationshipData::Many(vec![]));

        let none: RelationshipData = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(none, RelationshipData::One(None));
    }
}
