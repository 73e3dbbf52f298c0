//! Patch and inverse transform tables.
//!
//! [`patch`] applies one operation to the record maps. [`inverse`] computes,
//! against the state *before* the operation, the operations that undo it,
//! or an empty list when applying it would change nothing.

use crate::{
    cache::CacheState, error::Result, merge_records, IdentitySet, Record, RecordIdentity,
    RecordOperation, RelationshipData,
};
use serde_json::Value;

/// Apply `operation` to the record maps and return the resulting record.
///
/// `removeRecord` returns the removed record; operations that find nothing to
/// change return `None` or the unchanged record.
pub fn patch(state: &mut CacheState, operation: &RecordOperation) -> Result<Option<Record>> {
    match operation {
        RecordOperation::AddRecord { record } => {
            state.put_record(record.clone())?;
            Ok(Some(record.clone()))
        }

        RecordOperation::ReplaceRecord { record } => {
            let updated = match state.current(&record.record_type, &record.id)? {
                Some(current) => merge_records(current, record),
                None => record.clone(),
            };
            state.put_record(updated.clone())?;
            Ok(Some(updated))
        }

        RecordOperation::RemoveRecord { record } => state.take_record(record),

        RecordOperation::ReplaceKey { record, key, value } => {
            let mut updated = clone_or_create(state, record)?;
            match value {
                Some(value) => updated.keys.insert(key.clone(), value.clone()),
                None => updated.keys.remove(key),
            };
            state.put_record(updated.clone())?;
            Ok(Some(updated))
        }

        RecordOperation::ReplaceAttribute {
            record,
            attribute,
            value,
        } => {
            let mut updated = clone_or_create(state, record)?;
            if value.is_null() {
                updated.attributes.remove(attribute);
            } else {
                updated.attributes.insert(attribute.clone(), value.clone());
            }
            state.put_record(updated.clone())?;
            Ok(Some(updated))
        }

        RecordOperation::AddToRelatedRecords {
            record,
            relationship,
            related_record,
        } => {
            let mut updated = clone_or_create(state, record)?;
            match updated.relationships.get_mut(relationship) {
                Some(RelationshipData::Many(related)) => {
                    if !related.contains(related_record) {
                        related.push(related_record.clone());
                    }
                }
                _ => {
                    updated.relationships.insert(
                        relationship.clone(),
                        RelationshipData::Many(vec![related_record.clone()]),
                    );
                }
            }
            state.put_record(updated.clone())?;
            Ok(Some(updated))
        }

        RecordOperation::RemoveFromRelatedRecords {
            record,
            relationship,
            related_record,
        } => {
            let Some(current) = state.current(&record.record_type, &record.id)? else {
                return Ok(None);
            };
            let Some(RelationshipData::Many(related)) = current.relationships.get(relationship)
            else {
                return Ok(None);
            };
            let remaining: Vec<_> = related
                .iter()
                .filter(|r| *r != related_record)
                .cloned()
                .collect();

            let mut updated = current.clone();
            updated
                .relationships
                .insert(relationship.clone(), RelationshipData::Many(remaining));
            state.put_record(updated.clone())?;
            Ok(Some(updated))
        }

        RecordOperation::ReplaceRelatedRecords {
            record,
            relationship,
            related_records,
        } => replace_relationship(
            state,
            record,
            relationship,
            RelationshipData::Many(related_records.clone()),
        ),

        RecordOperation::ReplaceRelatedRecord {
            record,
            relationship,
            related_record,
        } => replace_relationship(
            state,
            record,
            relationship,
            RelationshipData::One(related_record.clone()),
        ),
    }
}

fn clone_or_create(state: &CacheState, identity: &RecordIdentity) -> Result<Record> {
    Ok(state
        .current(&identity.record_type, &identity.id)?
        .cloned()
        .unwrap_or_else(|| Record::from_identity(identity)))
}

fn replace_relationship(
    state: &mut CacheState,
    identity: &RecordIdentity,
    relationship: &str,
    data: RelationshipData,
) -> Result<Option<Record>> {
    let mut updated = clone_or_create(state, identity)?;
    if updated.relationships.get(relationship) == Some(&data) {
        return Ok(Some(updated));
    }
    updated.relationships.insert(relationship.to_string(), data);
    state.put_record(updated.clone())?;
    Ok(Some(updated))
}

/// Compute the operations that undo `operation` against current state.
///
/// An empty list means the operation would change nothing. Operations that
/// only clear data are no-ops on a missing record. Operations that write data
/// to a missing record create it, so their inverse removes it. When the write
/// was a relationship, the link is cleared before the stub is removed so that
/// `dependent: remove` never reaches the linked record.
pub fn inverse(state: &CacheState, operation: &RecordOperation) -> Result<Vec<RecordOperation>> {
    let identity = operation.identity();
    let current = state.current(&identity.record_type, &identity.id)?;

    let inverse = match operation {
        RecordOperation::AddRecord { record } => match current {
            None => vec![RecordOperation::remove_record(identity)],
            Some(current) if current == record => Vec::new(),
            Some(current) => vec![RecordOperation::add_record(current.clone())],
        },

        RecordOperation::ReplaceRecord { record } => match current {
            None => vec![RecordOperation::remove_record(identity)],
            Some(current) if merge_records(current, record) == *current => Vec::new(),
            Some(current) => vec![RecordOperation::add_record(current.clone())],
        },

        RecordOperation::RemoveRecord { .. } => current
            .map(|current| RecordOperation::add_record(current.clone()))
            .into_iter()
            .collect(),

        RecordOperation::ReplaceKey { key, value, .. } => match current {
            None if value.is_none() => Vec::new(),
            None => vec![RecordOperation::remove_record(identity)],
            Some(current) => {
                let prior = current.keys.get(key);
                if prior == value.as_ref() {
                    Vec::new()
                } else {
                    vec![RecordOperation::replace_key(identity, key.clone(), prior.cloned())]
                }
            }
        },

        RecordOperation::ReplaceAttribute {
            attribute, value, ..
        } => match current {
            None if value.is_null() => Vec::new(),
            None => vec![RecordOperation::remove_record(identity)],
            Some(current) => {
                let prior = current.attribute(attribute).cloned().unwrap_or(Value::Null);
                if prior == *value {
                    Vec::new()
                } else {
                    vec![RecordOperation::replace_attribute(identity, attribute.clone(), prior)]
                }
            }
        },

        RecordOperation::AddToRelatedRecords {
            relationship,
            related_record,
            ..
        } => {
            let unlink = RecordOperation::remove_from_related_records(
                identity.clone(),
                relationship.clone(),
                related_record.clone(),
            );
            match current {
                None => remove_stub(identity, unlink),
                Some(current) if current.related_records(relationship).contains(related_record) => {
                    Vec::new()
                }
                Some(_) => vec![unlink],
            }
        }

        RecordOperation::RemoveFromRelatedRecords {
            relationship,
            related_record,
            ..
        } => match current {
            Some(current) if current.related_records(relationship).contains(related_record) => {
                vec![RecordOperation::add_to_related_records(
                    identity,
                    relationship.clone(),
                    related_record.clone(),
                )]
            }
            _ => Vec::new(),
        },

        RecordOperation::ReplaceRelatedRecords {
            relationship,
            related_records,
            ..
        } => {
            let clear = RecordOperation::replace_related_records(
                identity.clone(),
                relationship.clone(),
                Vec::new(),
            );
            match current.map(|current| current.relationship(relationship)) {
                None if related_records.is_empty() => Vec::new(),
                None => remove_stub(identity, clear),
                Some(Some(RelationshipData::Many(prior))) => {
                    let unchanged = prior
                        .iter()
                        .cloned()
                        .collect::<IdentitySet>()
                        .matches(related_records);
                    if unchanged {
                        Vec::new()
                    } else {
                        vec![RecordOperation::replace_related_records(
                            identity,
                            relationship.clone(),
                            prior.clone(),
                        )]
                    }
                }
                Some(_) if related_records.is_empty() => Vec::new(),
                Some(_) => vec![clear],
            }
        }

        RecordOperation::ReplaceRelatedRecord {
            relationship,
            related_record,
            ..
        } => {
            let clear =
                RecordOperation::replace_related_record(identity.clone(), relationship.clone(), None);
            match current.map(|current| current.relationship(relationship)) {
                None if related_record.is_none() => Vec::new(),
                None => remove_stub(identity, clear),
                Some(Some(RelationshipData::One(prior))) if prior == related_record => Vec::new(),
                Some(Some(RelationshipData::One(prior))) => {
                    vec![RecordOperation::replace_related_record(
                        identity,
                        relationship.clone(),
                        prior.clone(),
                    )]
                }
                Some(_) if related_record.is_none() => Vec::new(),
                Some(_) => vec![clear],
            }
        }
    };

    Ok(inverse)
}

/// Undo a relationship write that created `identity`.
fn remove_stub(identity: RecordIdentity, clear: RecordOperation) -> Vec<RecordOperation> {
    vec![clear, RecordOperation::remove_record(identity)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheSettings, ModelDef, RelationshipDef, Schema};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> CacheState {
        let schema = Schema::new(1)
            .with_model(
                "planet",
                ModelDef::new()
                    .with_key("remoteId")
                    .with_attribute("name", crate::FieldType::String)
                    .with_relationship("moons", RelationshipDef::has_many("moon")),
            )
            .with_model(
                "moon",
                ModelDef::new().with_relationship("planet", RelationshipDef::has_one("planet")),
            );
        CacheState::new(&CacheSettings::new(Arc::new(schema)))
    }

    fn earth() -> RecordIdentity {
        RecordIdentity::new("planet", "earth")
    }

    fn luna() -> RecordIdentity {
        RecordIdentity::new("moon", "luna")
    }

    fn apply(state: &mut CacheState, op: RecordOperation) -> Vec<RecordOperation> {
        let inverse = inverse(state, &op).unwrap();
        patch(state, &op).unwrap();
        inverse
    }

    #[test]
    fn add_record_inverse() {
        let mut state = state();
        let record = Record::new("planet", "earth").with_attribute("name", json!("Earth"));

        let inv = apply(&mut state, RecordOperation::add_record(record.clone()));
        assert_eq!(inv, vec![RecordOperation::remove_record(earth())]);

        assert!(inverse(&state, &RecordOperation::add_record(record.clone()))
            .unwrap()
            .is_empty());

        let renamed = Record::new("planet", "earth").with_attribute("name", json!("Terra"));
        let inv = apply(&mut state, RecordOperation::add_record(renamed));
        assert_eq!(inv, vec![RecordOperation::add_record(record)]);
    }

    #[test]
    fn replace_record_merges() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_record(
                Record::new("planet", "earth")
                    .with_key("remoteId", "p-3")
                    .with_attribute("name", json!("Earth")),
            ),
        );

        let update = Record::new("planet", "earth").with_has_many("moons", [luna()]);
        let result = patch(&mut state, &RecordOperation::replace_record(update.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(result.key("remoteId"), Some("p-3"));
        assert_eq!(result.attribute("name"), Some(&json!("Earth")));
        assert_eq!(result.related_records("moons"), &[luna()]);

        assert!(inverse(&state, &RecordOperation::replace_record(update))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn add_record_pushes_keys() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_record(Record::new("planet", "earth").with_key("remoteId", "p-3")),
        );
        assert_eq!(
            state.key_map().key_to_id("planet", "remoteId", "p-3").as_deref(),
            Some("earth")
        );
    }

    #[test]
    fn remove_record_returns_removed() {
        let mut state = state();
        let record = Record::new("planet", "earth");
        apply(&mut state, RecordOperation::add_record(record.clone()));

        let op = RecordOperation::remove_record(earth());
        assert_eq!(
            inverse(&state, &op).unwrap(),
            vec![RecordOperation::add_record(record.clone())]
        );
        assert_eq!(patch(&mut state, &op).unwrap(), Some(record));
        assert_eq!(inverse(&state, &op).unwrap(), Vec::new());
        assert_eq!(patch(&mut state, &op).unwrap(), Vec::new());
    }

    #[test]
    fn field_inverses_restore_prior_values() {
        let mut state = state();
        apply(
            &mut state,
            RecordOperation::add_record(Record::new("planet", "earth").with_attribute("name", json!("Earth"))),
        );

        let inv = apply(
            &mut state,
            RecordOperation::replace_attribute(earth(), "name", json!("Terra")),
        );
        assert_eq!(
            inv,
            vec![RecordOperation::replace_attribute(earth(), "name", json!("Earth"))]
        );

        let inv = apply(&mut state, RecordOperation::replace_attribute(earth(), "name", Value::Null));
        assert_eq!(
            inv,
            vec![RecordOperation::replace_attribute(earth(), "name", json!("Terra"))]
        );
        assert_eq!(state.current("planet", "earth").unwrap().unwrap().attribute("name"), None);

        let inv = apply(
            &mut state,
            RecordOperation::replace_key(earth(), "remoteId", Some("p-3".into())),
        );
        assert_eq!(inv, vec![RecordOperation::replace_key(earth(), "remoteId", None)]);
    }

    #[test]
    fn writes_to_missing_record_create_it() {
        let mut state = state();
        let inv = apply(
            &mut state,
            RecordOperation::replace_attribute(earth(), "name", json!("Earth")),
        );
        assert_eq!(inv, vec![RecordOperation::remove_record(earth())]);
        assert!(state.current("planet", "earth").unwrap().is_some());

        let inv = apply(
            &mut state,
            RecordOperation::replace_related_record(luna(), "planet", Some(earth())),
        );
        assert_eq!(
            inv,
            vec![
                RecordOperation::replace_related_record(luna(), "planet", None),
                RecordOperation::remove_record(luna()),
            ]
        );
    }

    #[test]
    fn clears_on_missing_record_are_noops() {
        let state = state();
        let ops = [
            RecordOperation::remove_record(earth()),
            RecordOperation::replace_attribute(earth(), "name", Value::Null),
            RecordOperation::replace_key(earth(), "remoteId", None),
            RecordOperation::remove_from_related_records(earth(), "moons", luna()),
            RecordOperation::replace_related_records(earth(), "moons", Vec::new()),
            RecordOperation::replace_related_record(luna(), "planet", None),
        ];
        for op in &ops {
            assert_eq!(inverse(&state, op).unwrap(), Vec::new(), "{}", op.op_name());
        }
    }

    #[test]
    fn to_many_inverses() {
        let mut state = state();
        let inv = apply(
            &mut state,
            RecordOperation::add_to_related_records(earth(), "moons", luna()),
        );
        assert_eq!(
            inv,
            vec![
                RecordOperation::remove_from_related_records(earth(), "moons", luna()),
                RecordOperation::remove_record(earth()),
            ]
        );

        let again = RecordOperation::add_to_related_records(earth(), "moons", luna());
        assert_eq!(inverse(&state, &again).unwrap(), Vec::new());

        let other = RecordOperation::add_to_related_records(
            earth(),
            "moons",
            RecordIdentity::new("moon", "other"),
        );
        assert_eq!(
            apply(&mut state, other),
            vec![RecordOperation::remove_from_related_records(
                earth(),
                "moons",
                RecordIdentity::new("moon", "other")
            )]
        );

        let remove = RecordOperation::remove_from_related_records(earth(), "moons", luna());
        assert_eq!(
            apply(&mut state, remove.clone()),
            vec![RecordOperation::add_to_related_records(earth(), "moons", luna())]
        );
        assert_eq!(inverse(&state, &remove).unwrap(), Vec::new());
    }

    #[test]
    fn replace_related_records_ignores_order() {
        let mut state = state();
        let a = RecordIdentity::new("moon", "a");
        let b = RecordIdentity::new("moon", "b");
        apply(
            &mut state,
            RecordOperation::replace_related_records(earth(), "moons", [a.clone(), b.clone()]),
        );

        let reordered = RecordOperation::replace_related_records(earth(), "moons", [b, a.clone()]);
        assert_eq!(inverse(&state, &reordered).unwrap(), Vec::new());

        let shrink = RecordOperation::replace_related_records(earth(), "moons", [a.clone()]);
        assert!(matches!(
            apply(&mut state, shrink).as_slice(),
            [RecordOperation::ReplaceRelatedRecords { related_records, .. }] if related_records.len() == 2
        ));
    }

    #[test]
    fn replace_related_record_inverse() {
        let mut state = state();
        apply(&mut state, RecordOperation::add_record(Record::new("moon", "luna")));

        let inv = apply(
            &mut state,
            RecordOperation::replace_related_record(luna(), "planet", Some(earth())),
        );
        assert_eq!(
            inv,
            vec![RecordOperation::replace_related_record(luna(), "planet", None)]
        );

        let same = RecordOperation::replace_related_record(luna(), "planet", Some(earth()));
        assert_eq!(inverse(&state, &same).unwrap(), Vec::new());

        let inv = apply(
            &mut state,
            RecordOperation::replace_related_record(luna(), "planet", None),
        );
        assert_eq!(
            inv,
            vec![RecordOperation::replace_related_record(luna(), "planet", Some(earth()))]
        );
    }

    #[test]
    fn unknown_model_is_rejected() {
        let mut state = state();
        let op = RecordOperation::add_record(Record::new("star", "sol"));
        assert!(matches!(
            inverse(&state, &op),
            Err(crate::Error::ModelNotDefined(m)) if m == "star"
        ));
        assert!(matches!(
            patch(&mut state, &op),
            Err(crate::Error::ModelNotDefined(_))
        ));
    }
}
