//! Object validation against schema declarations.
//!
//! Checks are structural. Whether a reference points at a visible object of
//! the right entity depends on a context and is checked by `Session`.

use crate::model::object::{ObjectId, Value, Values};
use crate::schema::descriptor::{AttributeType, Schema};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Object-level schema violations raised on insert/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownEntity(String),
    UnknownProperty {
        entity: String,
        property: String,
    },
    TypeMismatch {
        entity: String,
        property: String,
        expected: &'static str,
    },
    MissingRequired {
        entity: String,
        property: String,
    },
    /// Relationship target is not visible or is not of the destination entity.
    InvalidReference {
        entity: String,
        property: String,
        target: ObjectId,
        destination: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "entity not declared in schema: {name}"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "property not declared in schema: {entity}.{property}")
            }
            Self::TypeMismatch {
                entity,
                property,
                expected,
            } => write!(f, "{entity}.{property} expects {expected}"),
            Self::MissingRequired { entity, property } => {
                write!(f, "required property missing: {entity}.{property}")
            }
            Self::InvalidReference {
                entity,
                property,
                target,
                destination,
            } => write!(
                f,
                "{entity}.{property} references {target}, which is not a visible {destination}"
            ),
        }
    }
}

impl Error for ValidationError {}

impl Schema {
    /// Checks a full property map for `entity` against its declaration.
    ///
    /// # Rules
    /// - Every key must be a declared attribute or relationship.
    /// - Values must match the declared type; `Null` only for optional ones.
    /// - Required properties must be present.
    pub fn validate_object(&self, entity: &str, values: &Values) -> Result<(), ValidationError> {
        let description = self
            .entity(entity)
            .ok_or_else(|| ValidationError::UnknownEntity(entity.to_string()))?;

        for (name, value) in values {
            if let Some(attribute) = description.find_attribute(name) {
                if value.is_null() {
                    if !attribute.optional {
                        return Err(missing(entity, name));
                    }
                    continue;
                }
                if !attribute_accepts(attribute.kind, value) {
                    return Err(ValidationError::TypeMismatch {
                        entity: entity.to_string(),
                        property: name.clone(),
                        expected: attribute_type_label(attribute.kind),
                    });
                }
            } else if let Some(relationship) = description.find_relationship(name) {
                let accepted = match value {
                    Value::Null => relationship.optional,
                    Value::Reference(_) => !relationship.to_many,
                    Value::ReferenceList(targets) => {
                        relationship.to_many && (relationship.optional || !targets.is_empty())
                    }
                    _ => false,
                };
                if !accepted {
                    return Err(ValidationError::TypeMismatch {
                        entity: entity.to_string(),
                        property: name.clone(),
                        expected: if relationship.to_many {
                            "a reference list"
                        } else {
                            "a reference"
                        },
                    });
                }
            } else {
                return Err(ValidationError::UnknownProperty {
                    entity: entity.to_string(),
                    property: name.clone(),
                });
            }
        }

        for attribute in description.attributes.iter().filter(|a| !a.optional) {
            if !values.contains_key(&attribute.name) {
                return Err(missing(entity, &attribute.name));
            }
        }
        for relationship in description.relationships.iter().filter(|r| !r.optional) {
            if !values.contains_key(&relationship.name) {
                return Err(missing(entity, &relationship.name));
            }
        }

        Ok(())
    }
}

fn missing(entity: &str, property: &str) -> ValidationError {
    ValidationError::MissingRequired {
        entity: entity.to_string(),
        property: property.to_string(),
    }
}

/// Non-finite reals are rejected: JSON has no encoding for them.
fn attribute_accepts(kind: AttributeType, value: &Value) -> bool {
    match (kind, value) {
        (AttributeType::Real, Value::Real(real)) => real.is_finite(),
        (AttributeType::Integer, Value::Integer(_))
        | (AttributeType::Real, Value::Integer(_))
        | (AttributeType::Text, Value::Text(_))
        | (AttributeType::Boolean, Value::Boolean(_)) => true,
        _ => false,
    }
}

fn attribute_type_label(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::Integer => "an integer",
        AttributeType::Real => "a finite real number",
        AttributeType::Text => "text",
        AttributeType::Boolean => "a boolean",
    }
}
