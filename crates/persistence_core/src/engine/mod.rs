//! Storage-engine capability interface.
//!
//! # Responsibility
//! - Define what the coordinator needs from an embedded engine: open a store
//!   for a schema, read objects, commit change sets.
//! - Keep engine choice out of context and coordinator logic.
//!
//! # Invariants
//! - A store is bound to exactly one schema for its whole lifetime.
//! - `Store::commit` is all-or-nothing.

use crate::model::change_set::ChangeSet;
use crate::model::object::{FetchRequest, ManagedObject, ObjectId};
use crate::queue::QueueError;
use crate::schema::Schema;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod migrations;
mod sqlite;

pub use sqlite::{JournalMode, SqliteEngine, SqliteStore};

pub type EngineResult<T> = Result<T, EngineError>;

/// Durable location of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Process-local store; contents vanish with the last connection.
    InMemory,
}

impl StoreLocation {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Parses `:memory:`, `file://` URIs and plain paths.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed == ":memory:" {
            return Self::InMemory;
        }
        match trimmed.strip_prefix("file://") {
            Some(path) => Self::File(PathBuf::from(path)),
            None => Self::File(PathBuf::from(trimmed)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path.as_path()),
            Self::InMemory => None,
        }
    }
}

impl From<&Path> for StoreLocation {
    fn from(value: &Path) -> Self {
        Self::File(value.to_path_buf())
    }
}

impl From<PathBuf> for StoreLocation {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "file://{}", path.display()),
            Self::InMemory => write!(f, ":memory:"),
        }
    }
}

/// Opens stores for a schema.
pub trait StorageEngine: Send + Sync {
    /// Short engine identifier used in logs.
    fn name(&self) -> &'static str;

    /// Opens (or creates) the store at `location` validated against `schema`.
    fn open(
        &self,
        location: &StoreLocation,
        schema: &Schema,
    ) -> Result<Arc<dyn Store>, StoreInitializationError>;
}

/// An opened store. Implementations serialize access internally.
pub trait Store: Send + Sync {
    fn location(&self) -> &StoreLocation;

    fn schema(&self) -> &Schema;

    fn get(&self, id: ObjectId) -> EngineResult<Option<ManagedObject>>;

    /// Returns every stored object of `request.entity` that matches, ordered
    /// by id. `request.limit` is honored.
    fn fetch(&self, request: &FetchRequest) -> EngineResult<Vec<ManagedObject>>;

    /// Applies all changes atomically.
    fn commit(&self, changes: &ChangeSet) -> EngineResult<()>;
}

/// Engine-level read/write failure.
#[derive(Debug)]
pub enum EngineError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    InvalidData(String),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "object encoding failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Failure to open a store.
#[derive(Debug)]
pub enum StoreInitializationError {
    /// Location cannot hold a store file.
    Unwritable { path: PathBuf, reason: String },
    /// On-disk data was written under another schema.
    IncompatibleSchema { stored: String, expected: String },
    /// On-disk table layout is newer than this build understands.
    UnsupportedFormatVersion { db_version: u32, latest_supported: u32 },
    /// Schema rejected before touching the store.
    InvalidSchema(crate::schema::SchemaDefinitionError),
    /// Main execution queue could not be started.
    QueueUnavailable(QueueError),
    Engine(EngineError),
}

impl Display for StoreInitializationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unwritable { path, reason } => {
                write!(f, "store location `{}` is unwritable: {reason}", path.display())
            }
            Self::IncompatibleSchema { stored, expected } => write!(
                f,
                "store was created with schema {stored}, refusing to open with {expected}"
            ),
            Self::UnsupportedFormatVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store format version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidSchema(err) => write!(f, "invalid schema: {err}"),
            Self::QueueUnavailable(err) => write!(f, "{err}"),
            Self::Engine(err) => write!(f, "store open failed: {err}"),
        }
    }
}

impl Error for StoreInitializationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidSchema(err) => Some(err),
            Self::QueueUnavailable(err) => Some(err),
            Self::Engine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for StoreInitializationError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<rusqlite::Error> for StoreInitializationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Engine(EngineError::Sqlite(value))
    }
}
