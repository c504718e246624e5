//! Object-graph schema descriptors.
//!
//! # Responsibility
//! - Declare the entity types and relationships a store may hold.
//! - Load schema documents and validate objects against them.
//!
//! # Invariants
//! - Stores are only opened with schemas that passed `Schema::validate()`.
//! - Context writes are validated before they enter a change set.

mod descriptor;
mod validation;

pub use descriptor::{
    AttributeDescription, AttributeType, EntityDescription, RelationshipDescription, Schema,
    SchemaDefinitionError, SchemaLoadError,
};
pub use validation::ValidationError;
