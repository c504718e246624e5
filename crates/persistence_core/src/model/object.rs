//! Managed object records and fetch requests.
//!
//! # Responsibility
//! - Define the record shape every context and store exchanges.
//! - Describe entity-scoped fetches with attribute equality filters.
//!
//! # Invariants
//! - `ObjectId` is generated once and never reused for another object.
//! - Fetch results are ordered by object id so merged views stay stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identity of one object in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Property value held by a managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    /// To-one relationship target.
    Reference(ObjectId),
    /// To-many relationship targets.
    ReferenceList(Vec<ObjectId>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Self::Reference(value)
    }
}

/// Property map keyed by attribute or relationship name.
pub type Values = BTreeMap<String, Value>;

/// One object of a schema entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub id: ObjectId,
    pub entity: String,
    pub values: Values,
}

impl ManagedObject {
    pub fn new(entity: impl Into<String>, values: Values) -> Self {
        Self {
            id: ObjectId::new(),
            entity: entity.into(),
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Builds a property map from `(name, value)` pairs.
pub fn values<I, K, V>(pairs: I) -> Values
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

/// Entity-scoped fetch with conjunctive equality filters.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((name.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns whether `object` belongs to the entity and passes every filter.
    ///
    /// A missing property compares equal to `Value::Null`.
    pub fn matches(&self, object: &ManagedObject) -> bool {
        if object.entity != self.entity {
            return false;
        }
        self.filters.iter().all(|(name, expected)| {
            match object.values.get(name) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            }
        })
    }

    /// Filters, orders by id and truncates a candidate set.
    pub fn apply<I>(&self, candidates: I) -> Vec<ManagedObject>
    where
        I: IntoIterator<Item = ManagedObject>,
    {
        let mut matched: Vec<ManagedObject> = candidates
            .into_iter()
            .filter(|object| self.matches(object))
            .collect();
        matched.sort_by(|left, right| left.id.cmp(&right.id));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}
