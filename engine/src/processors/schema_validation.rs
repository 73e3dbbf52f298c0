//! Rejects operations that do not fit the schema.

use super::OperationProcessor;
use crate::{
    cache::CacheState, error::Result, Error, ModelDef, Record, RecordIdentity, RecordOperation,
    RelationshipData, RelationshipDef,
};

/// Checks models, identities, keys, attributes and relationships.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidationProcessor;

impl OperationProcessor for SchemaValidationProcessor {
    fn name(&self) -> &'static str {
        "schema-validation"
    }

    fn validate(&self, state: &CacheState, operation: &RecordOperation) -> Result<()> {
        let schema = state.schema();
        let identity = operation.identity();
        check_identity(&identity)?;
        let model = schema.model(&identity.record_type)?;

        match operation {
            RecordOperation::AddRecord { record } | RecordOperation::ReplaceRecord { record } => {
                validate_record(model, record)
            }

            RecordOperation::RemoveRecord { .. } => Ok(()),

            RecordOperation::ReplaceKey { key, .. } => check_key(model, &identity.record_type, key),

            RecordOperation::ReplaceAttribute {
                attribute, value, ..
            } => check_attribute(model, &identity.record_type, attribute, value),

            RecordOperation::AddToRelatedRecords {
                relationship,
                related_record,
                ..
            }
            | RecordOperation::RemoveFromRelatedRecords {
                relationship,
                related_record,
                ..
            } => {
                let def = relationship_def(model, &identity.record_type, relationship, true)?;
                check_related(def, &identity.record_type, relationship, related_record)
            }

            RecordOperation::ReplaceRelatedRecords {
                relationship,
                related_records,
                ..
            } => {
                let def = relationship_def(model, &identity.record_type, relationship, true)?;
                related_records
                    .iter()
                    .try_for_each(|r| check_related(def, &identity.record_type, relationship, r))
            }

            RecordOperation::ReplaceRelatedRecord {
                relationship,
                related_record,
                ..
            } => {
                let def = relationship_def(model, &identity.record_type, relationship, false)?;
                related_record
                    .iter()
                    .try_for_each(|r| check_related(def, &identity.record_type, relationship, r))
            }
        }
    }
}

/// Validate a full record against its model.
pub(crate) fn validate_record(model: &ModelDef, record: &Record) -> Result<()> {
    let model_name = &record.record_type;

    for key in record.keys.keys() {
        check_key(model, model_name, key)?;
    }

    for (name, value) in &record.attributes {
        check_attribute(model, model_name, name, value)?;
    }

    for (name, data) in &record.relationships {
        let def = relationship_def(
            model,
            model_name,
            name,
            matches!(data, RelationshipData::Many(_)),
        )?;
        for related in data.identities() {
            check_related(def, model_name, name, related)?;
        }
    }

    Ok(())
}

fn check_identity(identity: &RecordIdentity) -> Result<()> {
    if identity.is_valid() {
        Ok(())
    } else {
        Err(Error::InvalidIdentity(identity.to_string()))
    }
}

fn check_key(model: &ModelDef, model_name: &str, key: &str) -> Result<()> {
    if model.keys.contains(key) {
        Ok(())
    } else {
        Err(Error::KeyNotDefined {
            model: model_name.to_string(),
            key: key.to_string(),
        })
    }
}

fn check_attribute(
    model: &ModelDef,
    model_name: &str,
    attribute: &str,
    value: &serde_json::Value,
) -> Result<()> {
    model
        .attributes
        .get(attribute)
        .ok_or_else(|| Error::AttributeNotDefined {
            model: model_name.to_string(),
            attribute: attribute.to_string(),
        })?
        .validate(attribute, value)
}

fn relationship_def<'a>(
    model: &'a ModelDef,
    model_name: &str,
    relationship: &str,
    has_many: bool,
) -> Result<&'a RelationshipDef> {
    let def = model
        .relationships
        .get(relationship)
        .ok_or_else(|| Error::RelationshipNotDefined {
            model: model_name.to_string(),
            relationship: relationship.to_string(),
        })?;

    if def.is_has_many() != has_many {
        return Err(Error::RelationshipKindMismatch {
            model: model_name.to_string(),
            relationship: relationship.to_string(),
            expected: def.kind_name().to_string(),
        });
    }
    Ok(def)
}

fn check_related(
    def: &RelationshipDef,
    model_name: &str,
    relationship: &str,
    related: &RecordIdentity,
) -> Result<()> {
    check_identity(related)?;
    if related.record_type != def.model() {
        return Err(Error::RelatedModelMismatch {
            model: model_name.to_string(),
            relationship: relationship.to_string(),
            expected: def.model().to_string(),
            got: related.record_type.clone(),
        });
    }
    Ok(())
}
