//! Keeps the relationship indices in step with the record maps.

use std::collections::BTreeSet;

use super::OperationProcessor;
use crate::{
    cache::CacheState, error::Result, InverseRelationship, RecordIdentity, RecordOperation,
};

/// Mirrors every written relationship into the forward and reverse indices,
/// and clears inbound references to a record when it is removed.
///
/// Pure bookkeeping: unlike schema consistency it ignores declared inverses
/// and indexes every edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheIntegrityProcessor;

impl OperationProcessor for CacheIntegrityProcessor {
    fn name(&self) -> &'static str {
        "cache-integrity"
    }

    fn after(&self, state: &CacheState, operation: &RecordOperation) -> Result<Vec<RecordOperation>> {
        let RecordOperation::RemoveRecord { record } = operation else {
            return Ok(Vec::new());
        };

        let ops: Vec<_> = state
            .inverse_relationships()
            .all(record)
            .into_iter()
            .filter(|inverse| inverse.record != *record)
            .map(|inverse| {
                let is_many = state
                    .relationships()
                    .related_records(&inverse.record, &inverse.relationship)
                    .is_some();
                if is_many {
                    RecordOperation::remove_from_related_records(
                        inverse.record,
                        inverse.relationship,
                        record,
                    )
                } else {
                    RecordOperation::replace_related_record(
                        inverse.record,
                        inverse.relationship,
                        None,
                    )
                }
            })
            .collect();

        if !ops.is_empty() {
            tracing::trace!(record = %record, cascaded = ops.len(), "Clearing inbound references");
        }
        Ok(ops)
    }

    fn immediate(&mut self, state: &mut CacheState, operation: &RecordOperation) {
        let owner = operation.identity();

        match operation {
            RecordOperation::AddRecord { .. } | RecordOperation::ReplaceRecord { .. } => {
                let stored = match state.current(&owner.record_type, &owner.id) {
                    Ok(Some(record)) => record.clone(),
                    _ => return,
                };
                let before = edges(state, &owner);
                if matches!(operation, RecordOperation::AddRecord { .. }) {
                    state.relationships_mut().add_record(&stored);
                } else {
                    state.relationships_mut().replace_record(&stored);
                }
                let after = edges(state, &owner);
                reindex(state, &owner, &before, &after);
            }

            RecordOperation::RemoveRecord { .. } => {
                let before = edges(state, &owner);
                state.relationships_mut().clear_record(&owner);
                reindex(state, &owner, &before, &BTreeSet::new());
            }

            RecordOperation::ReplaceKey { .. } | RecordOperation::ReplaceAttribute { .. } => {}

            RecordOperation::AddToRelatedRecords {
                relationship,
                related_record,
                ..
            } => {
                state
                    .relationships_mut()
                    .add_to_related_records(&owner, relationship, related_record);
                state.inverse_relationships_mut().add(
                    related_record,
                    InverseRelationship::new(owner.clone(), relationship.as_str()),
                );
            }

            RecordOperation::RemoveFromRelatedRecords {
                relationship,
                related_record,
                ..
            } => {
                state
                    .relationships_mut()
                    .remove_from_related_records(&owner, relationship, related_record);
                state.inverse_relationships_mut().remove(
                    related_record,
                    &InverseRelationship::new(owner.clone(), relationship.as_str()),
                );
            }

            RecordOperation::ReplaceRelatedRecords {
                relationship,
                related_records,
                ..
            } => {
                let before = edges(state, &owner);
                state
                    .relationships_mut()
                    .replace_related_records(&owner, relationship, related_records);
                let after = edges(state, &owner);
                reindex(state, &owner, &before, &after);
            }

            RecordOperation::ReplaceRelatedRecord {
                relationship,
                related_record,
                ..
            } => {
                let before = edges(state, &owner);
                state.relationships_mut().replace_related_record(
                    &owner,
                    relationship,
                    related_record.as_ref(),
                );
                let after = edges(state, &owner);
                reindex(state, &owner, &before, &after);
            }
        }
    }
}

fn edges(state: &CacheState, owner: &RecordIdentity) -> BTreeSet<(String, RecordIdentity)> {
    state.relationships().edges(owner).into_iter().collect()
}

/// Move reverse edges of `owner` from `before` to `after`.
fn reindex(
    state: &mut CacheState,
    owner: &RecordIdentity,
    before: &BTreeSet<(String, RecordIdentity)>,
    after: &BTreeSet<(String, RecordIdentity)>,
) {
    let inverse = state.inverse_relationships_mut();
    for (relationship, related) in before.difference(after) {
        inverse.remove(
            related,
            &InverseRelationship::new(owner.clone(), relationship.as_str()),
        );
    }
    for (relationship, related) in after.difference(before) {
        inverse.add(
            related,
            InverseRelationship::new(owner.clone(), relationship.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{transforms, CacheSettings, ModelDef, Record, RelationshipDef, Schema};
    use std::sync::Arc;

    fn state() -> CacheState {
        let schema = Schema::new(1)
            .with_model(
                "planet",
                ModelDef::new().with_relationship("moons", RelationshipDef::has_many("moon")),
            )
            .with_model(
                "moon",
                ModelDef::new().with_relationship("planet", RelationshipDef::has_one("planet")),
            );
        CacheState::new(&CacheSettings::new(Arc::new(schema)))
    }

    fn planet(id: &str) -> RecordIdentity {
        RecordIdentity::new("planet", id)
    }

    fn moon(id: &str) -> RecordIdentity {
        RecordIdentity::new("moon", id)
    }

    fn apply(state: &mut CacheState, op: RecordOperation) {
        transforms::patch(state, &op).unwrap();
        CacheIntegrityProcessor.immediate(state, &op);
    }

    #[test]
    fn add_record_indexes_edges() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m1")]),
            ),
        );

        assert!(state
            .relationships()
            .related_records_match(&planet("p1"), "moons", &[moon("m1")]));
        assert_eq!(
            state.inverse_relationships().all(&moon("m1")),
            vec![InverseRelationship::new(planet("p1"), "moons")]
        );
    }

    #[test]
    fn replacing_relationship_moves_reverse_edges() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::replace_related_record(moon("m1"), "planet", Some(planet("p1"))),
        );
        apply(
            &mut state,
            RecordOperation::replace_related_record(moon("m1"), "planet", Some(planet("p2"))),
        );

        assert!(state.inverse_relationships().all(&planet("p1")).is_empty());
        assert_eq!(state.inverse_relationships().all(&planet("p2")).len(), 1);
        assert_eq!(
            state.relationships().related_record(&moon("m1"), "planet"),
            Some(&planet("p2"))
        );
    }

    #[test]
    fn remove_record_clears_inbound_references() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_to_related_records(planet("p1"), "moons", moon("m1")),
        );
        apply(
            &mut state,
            RecordOperation::replace_related_record(moon("m2"), "planet", Some(planet("p1"))),
        );

        let ops = CacheIntegrityProcessor
            .after(&state, &RecordOperation::remove_record(moon("m1")))
            .unwrap();
        assert_eq!(
            ops,
            vec![RecordOperation::remove_from_related_records(
                planet("p1"),
                "moons",
                moon("m1")
            )]
        );

        let ops = CacheIntegrityProcessor
            .after(&state, &RecordOperation::remove_record(planet("p1")))
            .unwrap();
        assert_eq!(
            ops,
            vec![RecordOperation::replace_related_record(
                moon("m2"),
                "planet",
                None
            )]
        );
    }

    #[test]
    fn remove_record_drops_outbound_edges() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m1"), moon("m2")]),
            ),
        );
        apply(&mut state, RecordOperation::remove_record(planet("p1")));

        assert!(state.relationships().bucket(&planet("p1")).is_none());
        assert!(state.inverse_relationships().all(&moon("m1")).is_empty());
        assert!(state.inverse_relationships().all(&moon("m2")).is_empty());
    }
}
