//! Schema descriptor types and loading.
//!
//! # Responsibility
//! - Describe which entities, attributes and relationships a store may hold.
//! - Load descriptors from JSON documents and reject malformed ones.
//! - Produce a stable fingerprint used for on-disk compatibility checks.
//!
//! # Invariants
//! - A validated schema has unique entity names and unique property names
//!   per entity.
//! - Every relationship destination names a declared entity.
//! - The fingerprint depends only on declaration content and order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Scalar attribute storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Integer,
    Real,
    Text,
    Boolean,
}

/// One scalar property of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Optional attributes may be absent or `null`.
    #[serde(default)]
    pub optional: bool,
}

/// Reference from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescription {
    pub name: String,
    /// Name of the destination entity.
    pub destination: String,
    #[serde(default)]
    pub to_many: bool,
    #[serde(default = "default_true")]
    pub optional: bool,
}

/// Entity declaration: a named record type with its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Builder-style helper for required attributes.
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.push(AttributeDescription {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Builder-style helper for optional attributes.
    pub fn optional_attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.push(AttributeDescription {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Builder-style helper for optional relationships.
    pub fn relationship(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        to_many: bool,
    ) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            to_many,
            optional: true,
        });
        self
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn find_relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name == name)
    }
}

/// Object-graph schema (the "model" a store is validated against).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub entities: Vec<EntityDescription>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    /// Parses and validates a JSON schema document.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaLoadError> {
        let schema: Schema =
            serde_json::from_str(text).map_err(|source| SchemaLoadError::Parse {
                path: None,
                source,
            })?;
        schema.validate()?;
        Ok(schema)
    }

    /// Reads, parses and validates a JSON schema document from disk.
    ///
    /// # Errors
    /// - `Io` when the file is missing or unreadable.
    /// - `Parse` when the document is not a schema.
    /// - `Invalid` when declarations violate schema invariants.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let schema: Schema =
            serde_json::from_str(&text).map_err(|source| SchemaLoadError::Parse {
                path: Some(path.to_path_buf()),
                source,
            })?;
        schema.validate()?;
        Ok(schema)
    }

    /// Validates declaration-level invariants.
    pub fn validate(&self) -> Result<(), SchemaDefinitionError> {
        if self.name.trim().is_empty() {
            return Err(SchemaDefinitionError::EmptySchemaName);
        }
        if self.entities.is_empty() {
            return Err(SchemaDefinitionError::NoEntities);
        }

        let mut entity_names = BTreeSet::new();
        for entity in &self.entities {
            if !IDENTIFIER_RE.is_match(&entity.name) {
                return Err(SchemaDefinitionError::InvalidName(entity.name.clone()));
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(SchemaDefinitionError::DuplicateEntity(entity.name.clone()));
            }
        }

        for entity in &self.entities {
            let mut property_names = BTreeSet::new();
            let names = entity
                .attributes
                .iter()
                .map(|attribute| attribute.name.as_str())
                .chain(
                    entity
                        .relationships
                        .iter()
                        .map(|relationship| relationship.name.as_str()),
                );
            for name in names {
                if !IDENTIFIER_RE.is_match(name) {
                    return Err(SchemaDefinitionError::InvalidName(format!(
                        "{}.{name}",
                        entity.name
                    )));
                }
                if !property_names.insert(name) {
                    return Err(SchemaDefinitionError::DuplicateProperty {
                        entity: entity.name.clone(),
                        property: name.to_string(),
                    });
                }
            }

            for relationship in &entity.relationships {
                if !entity_names.contains(relationship.destination.as_str()) {
                    return Err(SchemaDefinitionError::UnknownDestination {
                        entity: entity.name.clone(),
                        relationship: relationship.name.clone(),
                        destination: relationship.destination.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Hex SHA-256 over the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        // Serializing plain structs with string keys cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&json);
        format!("{:x}", hasher.finalize())
    }
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Declaration-level schema defects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDefinitionError {
    EmptySchemaName,
    NoEntities,
    InvalidName(String),
    DuplicateEntity(String),
    DuplicateProperty {
        entity: String,
        property: String,
    },
    UnknownDestination {
        entity: String,
        relationship: String,
        destination: String,
    },
}

impl Display for SchemaDefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySchemaName => write!(f, "schema name cannot be empty"),
            Self::NoEntities => write!(f, "schema declares no entities"),
            Self::InvalidName(name) => write!(f, "invalid identifier `{name}`"),
            Self::DuplicateEntity(name) => write!(f, "entity declared twice: {name}"),
            Self::DuplicateProperty { entity, property } => {
                write!(f, "property declared twice: {entity}.{property}")
            }
            Self::UnknownDestination {
                entity,
                relationship,
                destination,
            } => write!(
                f,
                "relationship {entity}.{relationship} points to undeclared entity `{destination}`"
            ),
        }
    }
}

impl Error for SchemaDefinitionError {}

/// Failure to obtain a schema from a schema location.
#[derive(Debug)]
pub enum SchemaLoadError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    Invalid(SchemaDefinitionError),
}

impl Display for SchemaLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read schema `{}`: {source}", path.display())
            }
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "failed to parse schema `{}`: {source}", path.display()),
            Self::Parse { path: None, source } => write!(f, "failed to parse schema: {source}"),
            Self::Invalid(err) => write!(f, "invalid schema: {err}"),
        }
    }
}

impl Error for SchemaLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(err) => Some(err),
        }
    }
}

impl From<SchemaDefinitionError> for SchemaLoadError {
    fn from(value: SchemaDefinitionError) -> Self {
        Self::Invalid(value)
    }
}
