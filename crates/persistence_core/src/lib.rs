//! Layered-context persistence over an embedded object store.
//!
//! A `PersistenceCoordinator` owns one durable store and a root context bound
//! to it, mints child contexts for background and foreground work, and
//! flushes root changes to disk.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod queue;
pub mod schema;

pub use config::CoordinatorConfig;
pub use context::{ConcurrencyKind, Context, ContextError, ContextResult, Session};
pub use coordinator::{CoordinatorError, PersistenceCoordinator};
pub use engine::{
    EngineError, EngineResult, JournalMode, SqliteEngine, SqliteStore, StorageEngine, Store,
    StoreInitializationError, StoreLocation,
};
pub use lifecycle::{
    CoordinatorId, LifecycleEvent, LifecycleListener, LifecycleObservers, SubscriptionId,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::change_set::{Change, ChangeSet, ChangeSummary};
pub use model::object::{values, FetchRequest, ManagedObject, ObjectId, Value, Values};
pub use schema::{
    AttributeDescription, AttributeType, EntityDescription, RelationshipDescription, Schema,
    SchemaDefinitionError, SchemaLoadError, ValidationError,
};

/// Minimal health-check API for integration probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
