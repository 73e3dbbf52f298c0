//! Forward and reverse indices of the relationship graph.
//!
//! [`RelationshipAccessor`] answers "what does this record point at" and
//! [`InverseRelationshipAccessor`] answers "who points at this record". Both
//! keep one [`PersistentMap`] per model so cloning an accessor is a fork.

use std::collections::{BTreeMap, HashMap};

use crate::{IdentitySet, PersistentMap, Record, RecordIdentity, RelationshipData};

/// Stored value of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipValue {
    One(Option<RecordIdentity>),
    Many(IdentitySet),
}

impl RelationshipValue {
    fn identities(&self) -> Vec<RecordIdentity> {
        match self {
            RelationshipValue::One(related) => related.iter().cloned().collect(),
            RelationshipValue::Many(set) => set.iter().cloned().collect(),
        }
    }
}

impl From<&RelationshipData> for RelationshipValue {
    fn from(data: &RelationshipData) -> Self {
        match data {
            RelationshipData::One(related) => RelationshipValue::One(related.clone()),
            RelationshipData::Many(related) => {
                RelationshipValue::Many(related.iter().cloned().collect())
            }
        }
    }
}

/// Relationship values of a single record, by relationship name.
pub type RelationshipBucket = BTreeMap<String, RelationshipValue>;

/// Forward relationship index.
#[derive(Debug, Clone, Default)]
pub struct RelationshipAccessor {
    models: HashMap<String, PersistentMap<String, RelationshipBucket>>,
}

impl RelationshipAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relationship values stored for a record.
    pub fn bucket(&self, record: &RecordIdentity) -> Option<&RelationshipBucket> {
        self.models.get(&record.record_type)?.get(&record.id)
    }

    fn value(&self, record: &RecordIdentity, relationship: &str) -> Option<&RelationshipValue> {
        self.bucket(record)?.get(relationship)
    }

    /// Whether a value is stored for the relationship, even an empty one.
    pub fn relationship_exists(&self, record: &RecordIdentity, relationship: &str) -> bool {
        self.value(record, relationship).is_some()
    }

    /// Target of a to-one relationship.
    pub fn related_record(
        &self,
        record: &RecordIdentity,
        relationship: &str,
    ) -> Option<&RecordIdentity> {
        match self.value(record, relationship)? {
            RelationshipValue::One(related) => related.as_ref(),
            RelationshipValue::Many(_) => None,
        }
    }

    /// Members of a to-many relationship, or `None` if no value is stored.
    pub fn related_records(
        &self,
        record: &RecordIdentity,
        relationship: &str,
    ) -> Option<Vec<RecordIdentity>> {
        match self.value(record, relationship)? {
            RelationshipValue::Many(set) => Some(set.iter().cloned().collect()),
            RelationshipValue::One(_) => None,
        }
    }

    /// Set equality between the stored to-many value and `candidates`.
    ///
    /// An unset relationship matches an empty candidate list.
    pub fn related_records_match(
        &self,
        record: &RecordIdentity,
        relationship: &str,
        candidates: &[RecordIdentity],
    ) -> bool {
        match self.value(record, relationship) {
            Some(RelationshipValue::Many(set)) => set.matches(candidates),
            _ => candidates.is_empty(),
        }
    }

    /// Every `(relationship, related)` edge leaving a record.
    pub fn edges(&self, record: &RecordIdentity) -> Vec<(String, RecordIdentity)> {
        self.bucket(record)
            .map(|bucket| {
                bucket
                    .iter()
                    .flat_map(|(name, value)| {
                        value
                            .identities()
                            .into_iter()
                            .map(move |related| (name.clone(), related))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store the relationships of a full record, discarding earlier values.
    pub fn add_record(&mut self, record: &Record) {
        let bucket = record
            .relationships
            .iter()
            .map(|(name, data)| (name.clone(), RelationshipValue::from(data)))
            .collect();
        self.write(&record.identity(), bucket);
    }

    /// Store the relationships of a record over any earlier values.
    ///
    /// Relationships absent from `record` keep their stored value.
    pub fn replace_record(&mut self, record: &Record) {
        let identity = record.identity();
        let mut bucket = self.bucket(&identity).cloned().unwrap_or_default();
        for (name, data) in &record.relationships {
            bucket.insert(name.clone(), RelationshipValue::from(data));
        }
        self.write(&identity, bucket);
    }

    /// Drop every relationship value of a record.
    pub fn clear_record(&mut self, record: &RecordIdentity) {
        if let Some(map) = self.models.get_mut(&record.record_type) {
            map.remove(&record.id);
        }
    }

    pub fn add_to_related_records(
        &mut self,
        record: &RecordIdentity,
        relationship: &str,
        related: &RecordIdentity,
    ) {
        let mut bucket = self.bucket(record).cloned().unwrap_or_default();
        let mut set = match bucket.remove(relationship) {
            Some(RelationshipValue::Many(set)) => set,
            _ => IdentitySet::new(),
        };
        set.insert(related.clone());
        bucket.insert(relationship.to_string(), RelationshipValue::Many(set));
        self.write(record, bucket);
    }

    pub fn remove_from_related_records(
        &mut self,
        record: &RecordIdentity,
        relationship: &str,
        related: &RecordIdentity,
    ) {
        let Some(RelationshipValue::Many(current)) = self.value(record, relationship) else {
            return;
        };
        if !current.contains(related) {
            return;
        }
        let mut set = current.clone();
        set.remove(related);

        let mut bucket = self.bucket(record).cloned().unwrap_or_default();
        bucket.insert(relationship.to_string(), RelationshipValue::Many(set));
        self.write(record, bucket);
    }

    pub fn replace_related_records(
        &mut self,
        record: &RecordIdentity,
        relationship: &str,
        related: &[RecordIdentity],
    ) {
        let mut bucket = self.bucket(record).cloned().unwrap_or_default();
        bucket.insert(
            relationship.to_string(),
            RelationshipValue::Many(related.iter().cloned().collect()),
        );
        self.write(record, bucket);
    }

    pub fn replace_related_record(
        &mut self,
        record: &RecordIdentity,
        relationship: &str,
        related: Option<&RecordIdentity>,
    ) {
        let mut bucket = self.bucket(record).cloned().unwrap_or_default();
        bucket.insert(
            relationship.to_string(),
            RelationshipValue::One(related.cloned()),
        );
        self.write(record, bucket);
    }

    fn write(&mut self, record: &RecordIdentity, bucket: RelationshipBucket) {
        self.models
            .entry(record.record_type.clone())
            .or_default()
            .insert(record.id.clone(), bucket);
    }
}

/// A reverse edge: `record` points at the indexed record via `relationship`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InverseRelationship {
    pub record: RecordIdentity,
    pub relationship: String,
}

impl InverseRelationship {
    pub fn new(record: RecordIdentity, relationship: impl Into<String>) -> Self {
        Self {
            record,
            relationship: relationship.into(),
        }
    }
}

type InverseBucket = PersistentMap<InverseRelationship, ()>;

/// Reverse relationship index.
#[derive(Debug, Clone, Default)]
pub struct InverseRelationshipAccessor {
    models: HashMap<String, PersistentMap<String, InverseBucket>>,
}

impl InverseRelationshipAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record pointing at `related`, in a stable order.
    pub fn all(&self, related: &RecordIdentity) -> Vec<InverseRelationship> {
        let mut all: Vec<_> = self
            .models
            .get(&related.record_type)
            .and_then(|map| map.get(&related.id))
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default();
        all.sort();
        all
    }

    /// Whether `inverse` is indexed against `related`.
    pub fn contains(&self, related: &RecordIdentity, inverse: &InverseRelationship) -> bool {
        self.models
            .get(&related.record_type)
            .and_then(|map| map.get(&related.id))
            .is_some_and(|bucket| bucket.contains_key(inverse))
    }

    pub fn add(&mut self, related: &RecordIdentity, inverse: InverseRelationship) {
        let map = self.models.entry(related.record_type.clone()).or_default();
        let mut bucket = map.get(&related.id).cloned().unwrap_or_default();
        if bucket.contains_key(&inverse) {
            return;
        }
        bucket.insert(inverse, ());
        map.insert(related.id.clone(), bucket);
    }

    pub fn remove(&mut self, related: &RecordIdentity, inverse: &InverseRelationship) {
        let Some(map) = self.models.get_mut(&related.record_type) else {
            return;
        };
        let Some(current) = map.get(&related.id) else {
            return;
        };
        if !current.contains_key(inverse) {
            return;
        }
        let mut bucket = current.clone();
        bucket.remove(inverse);
        if bucket.is_empty() {
            map.remove(&related.id);
        } else {
            map.insert(related.id.clone(), bucket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planet(id: &str) -> RecordIdentity {
        RecordIdentity::new("planet", id)
    }

    fn moon(id: &str) -> RecordIdentity {
        RecordIdentity::new("moon", id)
    }

    #[test]
    fn add_record_derives_storage() {
        let mut rels = RelationshipAccessor::new();
        rels.add_record(
            &Record::new("planet", "jupiter")
                .with_has_many("moons", [moon("io"), moon("europa")])
                .with_has_one("sun", None),
        );

        assert!(rels.relationship_exists(&planet("jupiter"), "moons"));
        assert!(rels.relationship_exists(&planet("jupiter"), "sun"));
        assert!(!rels.relationship_exists(&planet("jupiter"), "rings"));
        assert!(rels.related_records_match(
            &planet("jupiter"),
            "moons",
            &[moon("europa"), moon("io")]
        ));
        assert_eq!(rels.related_record(&planet("jupiter"), "sun"), None);
        assert_eq!(rels.edges(&planet("jupiter")).len(), 2);
    }

    #[test]
    fn to_many_mutations() {
        let mut rels = RelationshipAccessor::new();
        let earth = planet("earth");

        rels.add_to_related_records(&earth, "moons", &moon("luna"));
        rels.add_to_related_records(&earth, "moons", &moon("luna"));
        assert_eq!(rels.related_records(&earth, "moons"), Some(vec![moon("luna")]));

        rels.remove_from_related_records(&earth, "moons", &moon("luna"));
        assert_eq!(rels.related_records(&earth, "moons"), Some(vec![]));

        rels.replace_related_records(&earth, "moons", &[moon("a"), moon("b")]);
        assert!(rels.related_records_match(&earth, "moons", &[moon("b"), moon("a")]));
    }

    #[test]
    fn unset_to_many_matches_empty() {
        let rels = RelationshipAccessor::new();
        assert!(rels.related_records_match(&planet("earth"), "moons", &[]));
        assert!(!rels.related_records_match(&planet("earth"), "moons", &[moon("luna")]));
        assert_eq!(rels.related_records(&planet("earth"), "moons"), None);
    }

    #[test]
    fn to_one_mutations() {
        let mut rels = RelationshipAccessor::new();
        rels.replace_related_record(&moon("luna"), "planet", Some(&planet("earth")));
        assert_eq!(
            rels.related_record(&moon("luna"), "planet"),
            Some(&planet("earth"))
        );

        rels.replace_related_record(&moon("luna"), "planet", None);
        assert!(rels.relationship_exists(&moon("luna"), "planet"));
        assert_eq!(rels.related_record(&moon("luna"), "planet"), None);

        rels.clear_record(&moon("luna"));
        assert!(!rels.relationship_exists(&moon("luna"), "planet"));
    }

    #[test]
    fn replace_record_keeps_absent_relationships() {
        let mut rels = RelationshipAccessor::new();
        rels.add_record(&Record::new("planet", "earth").with_has_many("moons", [moon("luna")]));
        rels.replace_record(&Record::new("planet", "earth").with_has_one("sun", None));
        assert!(rels.relationship_exists(&planet("earth"), "moons"));
        assert!(rels.relationship_exists(&planet("earth"), "sun"));

        rels.add_record(&Record::new("planet", "earth"));
        assert!(!rels.relationship_exists(&planet("earth"), "moons"));
    }

    #[test]
    fn fork_isolation() {
        let mut base = RelationshipAccessor::new();
        base.add_to_related_records(&planet("earth"), "moons", &moon("luna"));

        let mut fork = base.clone();
        fork.add_to_related_records(&planet("earth"), "moons", &moon("other"));
        fork.clear_record(&planet("earth"));

        assert_eq!(
            base.related_records(&planet("earth"), "moons"),
            Some(vec![moon("luna")])
        );
    }

    #[test]
    fn inverse_index() {
        let mut inverse = InverseRelationshipAccessor::new();
        let earth = planet("earth");
        let luna_edge = InverseRelationship::new(moon("luna"), "planet");
        let io_edge = InverseRelationship::new(moon("io"), "planet");

        inverse.add(&earth, luna_edge.clone());
        inverse.add(&earth, io_edge.clone());
        inverse.add(&earth, io_edge.clone());
        assert_eq!(inverse.all(&earth), vec![io_edge.clone(), luna_edge.clone()]);
        assert!(inverse.contains(&earth, &luna_edge));

        let snapshot = inverse.clone();
        inverse.remove(&earth, &io_edge);
        inverse.remove(&earth, &luna_edge);
        assert!(inverse.all(&earth).is_empty());
        assert_eq!(snapshot.all(&earth).len(), 2);

        inverse.remove(&planet("mars"), &luna_edge);
        assert!(inverse.all(&planet("mars")).is_empty());
    }
}
