//! Schema definition and validation.
//!
//! A schema names the models a cache may hold and, for each model, its keys,
//! attributes and relationships. It is checked once when a cache is built;
//! operations are then validated against it by the schema validation
//! processor.

use crate::{error::Result, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl AttributeDef {
    /// Create a new attribute definition.
    pub fn new(field_type: FieldType) -> Self {
        Self { field_type }
    }

    /// Validate a value against this definition.
    ///
    /// `null` is accepted for every type: it means "unset".
    pub fn validate(&self, name: &str, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            _ if value.is_null() => true,
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: name.to_string(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// What happens to related records when their owner is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependent {
    /// Remove the related records too
    Remove,
}

/// Definition of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelationshipDef {
    /// To-one relationship
    #[serde(rename_all = "camelCase")]
    HasOne {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dependent: Option<Dependent>,
    },
    /// To-many relationship
    #[serde(rename_all = "camelCase")]
    HasMany {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dependent: Option<Dependent>,
    },
}

impl RelationshipDef {
    /// To-one relationship without inverse.
    pub fn has_one(model: impl Into<String>) -> Self {
        RelationshipDef::HasOne {
            model: model.into(),
            inverse: None,
            dependent: None,
        }
    }

    /// To-many relationship without inverse.
    pub fn has_many(model: impl Into<String>) -> Self {
        RelationshipDef::HasMany {
            model: model.into(),
            inverse: None,
            dependent: None,
        }
    }

    /// Builder-style method to name the reciprocal relationship.
    pub fn with_inverse(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            RelationshipDef::HasOne { inverse, .. } | RelationshipDef::HasMany { inverse, .. } => {
                *inverse = Some(name.into())
            }
        }
        self
    }

    /// Builder-style method to set the dependent policy.
    pub fn with_dependent(mut self, policy: Dependent) -> Self {
        match &mut self {
            RelationshipDef::HasOne { dependent, .. }
            | RelationshipDef::HasMany { dependent, .. } => *dependent = Some(policy),
        }
        self
    }

    /// Target model.
    pub fn model(&self) -> &str {
        match self {
            RelationshipDef::HasOne { model, .. } | RelationshipDef::HasMany { model, .. } => {
                model
            }
        }
    }

    /// Reciprocal relationship name on the target model.
    pub fn inverse(&self) -> Option<&str> {
        match self {
            RelationshipDef::HasOne { inverse, .. } | RelationshipDef::HasMany { inverse, .. } => {
                inverse.as_deref()
            }
        }
    }

    /// Dependent policy.
    pub fn dependent(&self) -> Option<Dependent> {
        match self {
            RelationshipDef::HasOne { dependent, .. }
            | RelationshipDef::HasMany { dependent, .. } => *dependent,
        }
    }

    /// Whether this is a to-many relationship.
    pub fn is_has_many(&self) -> bool {
        matches!(self, RelationshipDef::HasMany { .. })
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        if self.is_has_many() {
            "hasMany"
        } else {
            "hasOne"
        }
    }
}

/// Definition of a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    /// Names of alternate keys
    #[serde(default)]
    pub keys: BTreeSet<String>,
    /// Attribute definitions by name
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDef>,
    /// Relationship definitions by name
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDef>,
}

impl ModelDef {
    /// Create an empty model definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to declare a key.
    pub fn with_key(mut self, name: impl Into<String>) -> Self {
        self.keys.insert(name.into());
        self
    }

    /// Builder-style method to declare an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.attributes
            .insert(name.into(), AttributeDef::new(field_type));
        self
    }

    /// Builder-style method to declare a relationship.
    pub fn with_relationship(mut self, name: impl Into<String>, def: RelationshipDef) -> Self {
        self.relationships.insert(name.into(), def);
        self
    }
}

/// Schema for the entire cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for upgrades
    pub version: SchemaVersion,
    /// Model definitions by name
    pub models: BTreeMap<String, ModelDef>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            models: BTreeMap::new(),
        }
    }

    /// Add a model to the schema.
    pub fn add_model(&mut self, name: impl Into<String>, model: ModelDef) -> &mut Self {
        self.models.insert(name.into(), model);
        self
    }

    /// Builder-style method to add a model.
    pub fn with_model(mut self, name: impl Into<String>, model: ModelDef) -> Self {
        self.add_model(name, model);
        self
    }

    /// Get a model definition.
    pub fn model(&self, name: &str) -> Result<&ModelDef> {
        self.models
            .get(name)
            .ok_or_else(|| Error::ModelNotDefined(name.to_string()))
    }

    /// Get a relationship definition.
    pub fn relationship(&self, model: &str, relationship: &str) -> Result<&RelationshipDef> {
        self.model(model)?
            .relationships
            .get(relationship)
            .ok_or_else(|| Error::RelationshipNotDefined {
                model: model.to_string(),
                relationship: relationship.to_string(),
            })
    }

    /// Check that the schema is internally consistent.
    ///
    /// Every relationship must target a defined model, and every declared
    /// inverse must exist on the target and name this relationship back.
    pub fn check(&self) -> Result<()> {
        for (model_name, model) in &self.models {
            for (name, def) in &model.relationships {
                let target = self.models.get(def.model()).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "relationship '{}.{}' targets unknown model '{}'",
                        model_name,
                        name,
                        def.model()
                    ))
                })?;

                let Some(inverse) = def.inverse() else {
                    continue;
                };

                let inverse_def = target.relationships.get(inverse).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "inverse '{}.{}' of '{}.{}' is not defined",
                        def.model(),
                        inverse,
                        model_name,
                        name
                    ))
                })?;

                if inverse_def.model() != model_name || inverse_def.inverse() != Some(name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "inverse '{}.{}' does not point back to '{}.{}'",
                        def.model(),
                        inverse,
                        model_name,
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}
