//! Keeps both sides of bidirectional relationships in sync.

use std::collections::BTreeSet;

use super::OperationProcessor;
use crate::{
    cache::CacheState, error::Result, Dependent, Record, RecordIdentity, RecordOperation,
    RelationshipData, RelationshipDef, Schema,
};

/// Derives the operations that mirror a relationship change on the other side
/// of each declared inverse, and cascades `dependent: remove`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaConsistencyProcessor;

impl OperationProcessor for SchemaConsistencyProcessor {
    fn name(&self) -> &'static str {
        "schema-consistency"
    }

    fn after(&self, state: &CacheState, operation: &RecordOperation) -> Result<Vec<RecordOperation>> {
        let owner = operation.identity();
        let current = state.current(&owner.record_type, &owner.id)?;
        let mut ops = Mirror::new(state, &owner);

        match operation {
            RecordOperation::AddRecord { record } => {
                let names: BTreeSet<&String> = record
                    .relationships
                    .keys()
                    .chain(current.into_iter().flat_map(|c| c.relationships.keys()))
                    .collect();
                for name in names {
                    ops.diff(
                        name,
                        identities(current, name),
                        record.relationship(name).map(related_set).unwrap_or_default(),
                    )?;
                }
            }

            RecordOperation::ReplaceRecord { record } => {
                for (name, data) in &record.relationships {
                    ops.diff(name, identities(current, name), related_set(data))?;
                }
            }

            RecordOperation::RemoveRecord { .. } => {
                let Some(current) = current else {
                    return Ok(Vec::new());
                };
                for (name, data) in &current.relationships {
                    let def = state.schema().relationship(&owner.record_type, name)?;
                    for related in data.identities() {
                        if def.dependent() == Some(Dependent::Remove) {
                            ops.push(RecordOperation::remove_record(related));
                        } else {
                            ops.unlink(def, related)?;
                        }
                    }
                }
            }

            RecordOperation::ReplaceKey { .. } | RecordOperation::ReplaceAttribute { .. } => {}

            RecordOperation::AddToRelatedRecords {
                relationship,
                related_record,
                ..
            } => {
                let def = state.schema().relationship(&owner.record_type, relationship)?;
                ops.link(def, related_record)?;
            }

            RecordOperation::RemoveFromRelatedRecords {
                relationship,
                related_record,
                ..
            } => {
                if identities(current, relationship).contains(related_record) {
                    let def = state.schema().relationship(&owner.record_type, relationship)?;
                    ops.unlink(def, related_record)?;
                }
            }

            RecordOperation::ReplaceRelatedRecords {
                relationship,
                related_records,
                ..
            } => {
                ops.diff(
                    relationship,
                    identities(current, relationship),
                    related_records.iter().cloned().collect(),
                )?;
            }

            RecordOperation::ReplaceRelatedRecord {
                relationship,
                related_record,
                ..
            } => {
                ops.diff(
                    relationship,
                    identities(current, relationship),
                    related_record.iter().cloned().collect(),
                )?;
            }
        }

        let ops = ops.finish();
        if !ops.is_empty() {
            tracing::trace!(
                op = operation.op_name(),
                record = %owner,
                cascaded = ops.len(),
                "Schema consistency cascade"
            );
        }
        Ok(ops)
    }
}

fn identities(record: Option<&Record>, relationship: &str) -> BTreeSet<RecordIdentity> {
    record
        .and_then(|r| r.relationship(relationship))
        .map(related_set)
        .unwrap_or_default()
}

fn related_set(data: &RelationshipData) -> BTreeSet<RecordIdentity> {
    data.identities().cloned().collect()
}

/// Accumulates mirror operations for one owner record.
struct Mirror<'a> {
    state: &'a CacheState,
    schema: &'a Schema,
    owner: &'a RecordIdentity,
    ops: Vec<RecordOperation>,
}

impl<'a> Mirror<'a> {
    fn new(state: &'a CacheState, owner: &'a RecordIdentity) -> Self {
        Self {
            state,
            schema: state.schema(),
            owner,
            ops: Vec::new(),
        }
    }

    fn push(&mut self, op: RecordOperation) {
        self.ops.push(op);
    }

    fn finish(self) -> Vec<RecordOperation> {
        self.ops
    }

    /// Mirror a change of `relationship` from `before` to `after`.
    fn diff(
        &mut self,
        relationship: &str,
        before: BTreeSet<RecordIdentity>,
        after: BTreeSet<RecordIdentity>,
    ) -> Result<()> {
        if before == after {
            return Ok(());
        }
        let def = self
            .schema
            .relationship(&self.owner.record_type, relationship)?;
        for removed in before.difference(&after) {
            self.unlink(def, removed)?;
        }
        for added in after.difference(&before) {
            self.link(def, added)?;
        }
        Ok(())
    }

    /// Point `related`'s inverse relationship at the owner.
    fn link(&mut self, def: &RelationshipDef, related: &RecordIdentity) -> Result<()> {
        let Some(inverse) = def.inverse() else {
            return Ok(());
        };
        let op = if self.schema.relationship(def.model(), inverse)?.is_has_many() {
            RecordOperation::add_to_related_records(related, inverse, self.owner)
        } else {
            RecordOperation::replace_related_record(related, inverse, Some(self.owner.clone()))
        };
        self.ops.push(op);
        Ok(())
    }

    /// Drop the owner from `related`'s inverse relationship.
    fn unlink(&mut self, def: &RelationshipDef, related: &RecordIdentity) -> Result<()> {
        let Some(inverse) = def.inverse() else {
            return Ok(());
        };
        if self.schema.relationship(def.model(), inverse)?.is_has_many() {
            self.ops.push(RecordOperation::remove_from_related_records(
                related, inverse, self.owner,
            ));
            return Ok(());
        }

        // Only clear a to-one that still points back at the owner.
        let points_back = self
            .state
            .current(&related.record_type, &related.id)?
            .and_then(|r| r.related_record(inverse))
            == Some(self.owner);
        if points_back {
            self.ops.push(RecordOperation::replace_related_record(
                related, inverse, None,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{transforms, CacheSettings, ModelDef};
    use std::sync::Arc;

    fn state() -> CacheState {
        let schema = Schema::new(1)
            .with_model(
                "planet",
                ModelDef::new().with_relationship(
                    "moons",
                    RelationshipDef::has_many("moon")
                        .with_inverse("planet")
                        .with_dependent(Dependent::Remove),
                ),
            )
            .with_model(
                "moon",
                ModelDef::new().with_relationship(
                    "planet",
                    RelationshipDef::has_one("planet").with_inverse("moons"),
                ),
            )
            .with_model(
                "star",
                ModelDef::new()
                    .with_relationship("planets", RelationshipDef::has_many("planet")),
            );
        CacheState::new(&CacheSettings::new(Arc::new(schema)))
    }

    fn planet(id: &str) -> RecordIdentity {
        RecordIdentity::new("planet", id)
    }

    fn moon(id: &str) -> RecordIdentity {
        RecordIdentity::new("moon", id)
    }

    fn after(state: &CacheState, op: RecordOperation) -> Vec<RecordOperation> {
        SchemaConsistencyProcessor.after(state, &op).unwrap()
    }

    #[test]
    fn add_to_has_many_sets_has_one() {
        let ops = after(
            &state(),
            RecordOperation::add_to_related_records(planet("p1"), "moons", moon("m1")),
        );
        assert_eq!(
            ops,
            vec![RecordOperation::replace_related_record(
                moon("m1"),
                "planet",
                Some(planet("p1"))
            )]
        );
    }

    #[test]
    fn replace_has_one_moves_between_owners() {
        let mut state = state();
        transforms::patch(
            &mut state,
            &RecordOperation::add_record(
                Record::new("moon", "m1").with_has_one("planet", Some(planet("p1"))),
            ),
        )
        .unwrap();

        let ops = after(
            &state,
            RecordOperation::replace_related_record(moon("m1"), "planet", Some(planet("p2"))),
        );
        assert_eq!(
            ops,
            vec![
                RecordOperation::remove_from_related_records(planet("p1"), "moons", moon("m1")),
                RecordOperation::add_to_related_records(planet("p2"), "moons", moon("m1")),
            ]
        );
    }

    #[test]
    fn unlink_has_one_only_when_pointing_back() {
        let mut state = state();
        transforms::patch(
            &mut state,
            &RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m1")]),
            ),
        )
        .unwrap();
        transforms::patch(
            &mut state,
            &RecordOperation::add_record(
                Record::new("moon", "m1").with_has_one("planet", Some(planet("p2"))),
            ),
        )
        .unwrap();

        let ops = after(
            &state,
            RecordOperation::remove_from_related_records(planet("p1"), "moons", moon("m1")),
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn remove_record_cascades_dependents() {
        let mut state = state();
        transforms::patch(
            &mut state,
            &RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m1"), moon("m2")]),
            ),
        )
        .unwrap();

        let ops = after(&state, RecordOperation::remove_record(planet("p1")));
        assert_eq!(
            ops,
            vec![
                RecordOperation::remove_record(moon("m1")),
                RecordOperation::remove_record(moon("m2")),
            ]
        );
    }

    #[test]
    fn relationships_without_inverse_are_ignored() {
        let ops = after(
            &state(),
            RecordOperation::add_to_related_records(
                RecordIdentity::new("star", "sol"),
                "planets",
                planet("p1"),
            ),
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn add_record_diffs_against_current() {
        let mut state = state();
        transforms::patch(
            &mut state,
            &RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m1"), moon("m2")]),
            ),
        )
        .unwrap();

        let ops = after(
            &state,
            RecordOperation::add_record(
                Record::new("planet", "p1").with_has_many("moons", [moon("m2"), moon("m3")]),
            ),
        );
        assert_eq!(
            ops,
            vec![RecordOperation::replace_related_record(
                moon("m3"),
                "planet",
                Some(planet("p1"))
            )]
        );
    }
}
