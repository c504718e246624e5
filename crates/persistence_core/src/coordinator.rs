//! Persistence coordinator: store owner and context factory.
//!
//! # Responsibility
//! - Open the durable store and own the root context bound to it.
//! - Mint background and foreground child contexts of the root.
//! - Flush root changes to disk, synchronously or fire-and-forget.
//!
//! # Invariants
//! - Construction either returns a ready coordinator or fails; no partially
//!   initialized coordinator is observable.
//! - `DidInitialize` is emitted exactly once, before the constructor returns.
//! - Every child minted here has the root as parent.
//! - Asynchronous saves never report failures to the caller; they are
//!   logged and broadcast as `SaveFailed`.
//! - Dropping the coordinator waits for work already queued on the main
//!   queue.

use crate::config::CoordinatorConfig;
use crate::context::{CommitHook, ConcurrencyKind, Context, ContextError, ContextResult};
use crate::engine::{StorageEngine, Store, StoreInitializationError, StoreLocation};
use crate::lifecycle::{
    CoordinatorId, LifecycleEvent, LifecycleListener, LifecycleObservers, SubscriptionId,
};
use crate::model::change_set::ChangeSummary;
use crate::queue::DispatchQueue;
use crate::schema::{Schema, SchemaLoadError};
use log::{error, info};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Construction failure when the schema is loaded from a location.
#[derive(Debug)]
pub enum CoordinatorError {
    SchemaLoad(SchemaLoadError),
    StoreInitialization(StoreInitializationError),
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaLoad(err) => write!(f, "{err}"),
            Self::StoreInitialization(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SchemaLoad(err) => Some(err),
            Self::StoreInitialization(err) => Some(err),
        }
    }
}

impl From<SchemaLoadError> for CoordinatorError {
    fn from(value: SchemaLoadError) -> Self {
        Self::SchemaLoad(value)
    }
}

impl From<StoreInitializationError> for CoordinatorError {
    fn from(value: StoreInitializationError) -> Self {
        Self::StoreInitialization(value)
    }
}

/// Owner of one durable store and its root context.
pub struct PersistenceCoordinator {
    id: CoordinatorId,
    config: CoordinatorConfig,
    store: Arc<dyn Store>,
    main_queue: Arc<DispatchQueue>,
    root: Context,
    observers: Arc<LifecycleObservers>,
    next_child: AtomicU64,
}

impl PersistenceCoordinator {
    /// Opens (or creates) the SQLite store at `location` for `schema`.
    pub fn new(
        location: impl Into<StoreLocation>,
        schema: Schema,
    ) -> Result<Self, StoreInitializationError> {
        Self::new_with_observers(location, schema, LifecycleObservers::new())
    }

    /// Like [`PersistenceCoordinator::new`], with listeners registered before
    /// `DidInitialize` is emitted.
    pub fn new_with_observers(
        location: impl Into<StoreLocation>,
        schema: Schema,
        observers: LifecycleObservers,
    ) -> Result<Self, StoreInitializationError> {
        let config = CoordinatorConfig::default();
        let engine = config.sqlite_engine();
        Self::open(location.into(), schema, config, &engine, observers)
    }

    /// Loads the schema document at `schema_location`, then behaves like
    /// [`PersistenceCoordinator::new`].
    pub fn with_schema_location(
        location: impl Into<StoreLocation>,
        schema_location: impl AsRef<Path>,
    ) -> Result<Self, CoordinatorError> {
        Self::with_schema_location_and_observers(
            location,
            schema_location,
            LifecycleObservers::new(),
        )
    }

    /// Like [`PersistenceCoordinator::with_schema_location`], with listeners
    /// registered before `DidInitialize` is emitted. Nothing is emitted when
    /// the schema document fails to load.
    pub fn with_schema_location_and_observers(
        location: impl Into<StoreLocation>,
        schema_location: impl AsRef<Path>,
        observers: LifecycleObservers,
    ) -> Result<Self, CoordinatorError> {
        let schema = Schema::load(schema_location)?;
        Ok(Self::new_with_observers(location, schema, observers)?)
    }

    /// Full constructor: explicit configuration, engine and pre-registered
    /// lifecycle listeners.
    ///
    /// # Side effects
    /// - Starts the main queue worker.
    /// - Emits `coordinator_init` logging events and one `DidInitialize`.
    pub fn open(
        location: StoreLocation,
        schema: Schema,
        config: CoordinatorConfig,
        engine: &dyn StorageEngine,
        observers: LifecycleObservers,
    ) -> Result<Self, StoreInitializationError> {
        let started_at = Instant::now();
        let id = NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "event=coordinator_init module=coordinator status=start coordinator_id={id} engine={} location={location}",
            engine.name()
        );

        let store = match engine.open(&location, &schema) {
            Ok(store) => store,
            Err(err) => {
                error!(
                    "event=coordinator_init module=coordinator status=error coordinator_id={id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };
        let main_queue = DispatchQueue::new(config.main_queue_label.clone())
            .map_err(StoreInitializationError::QueueUnavailable)?;

        let observers = Arc::new(observers);
        let root = Context::new_root(
            "root",
            Arc::clone(&main_queue),
            Arc::clone(&store),
            Some(commit_hook(id, Arc::clone(&observers))),
        );

        let coordinator = Self {
            id,
            config,
            store,
            main_queue,
            root,
            observers,
            next_child: AtomicU64::new(1),
        };

        info!(
            "event=coordinator_init module=coordinator status=ok coordinator_id={id} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        coordinator
            .observers
            .emit(&LifecycleEvent::DidInitialize { coordinator: id });
        Ok(coordinator)
    }

    pub fn id(&self) -> CoordinatorId {
        self.id
    }

    /// Root context bound to the store. Confined to the main queue.
    pub fn context(&self) -> &Context {
        &self.root
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn store_location(&self) -> &StoreLocation {
        self.store.location()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Registers a listener for save events emitted from now on.
    pub fn subscribe(&self, listener: impl LifecycleListener + 'static) -> SubscriptionId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// New child of the root on its own serial queue, for off-main work.
    pub fn new_background_child_context(&self) -> ContextResult<Context> {
        let index = self.next_child.fetch_add(1, Ordering::Relaxed);
        let queue = DispatchQueue::new(format!(
            "{}.{index}",
            self.config.background_queue_label
        ))
        .map_err(ContextError::from)?;
        Ok(self
            .root
            .new_child(format!("background-{index}"), ConcurrencyKind::Background, queue))
    }

    /// New child of the root confined to the main queue, for UI work.
    pub fn new_foreground_child_context(&self) -> Context {
        let index = self.next_child.fetch_add(1, Ordering::Relaxed);
        self.root.new_child(
            format!("foreground-{index}"),
            ConcurrencyKind::Main,
            Arc::clone(&self.main_queue),
        )
    }

    /// Commits root changes to the store.
    ///
    /// - `wait == true`: blocks until the commit finishes and returns its
    ///   failure, if any.
    /// - `wait == false`: schedules the commit on the main queue and returns
    ///   `Ok(())` at once. Failures are only logged and broadcast as
    ///   `SaveFailed`.
    pub fn save_and_wait(&self, wait: bool) -> ContextResult<()> {
        let coordinator = self.id;
        if wait {
            info!(
                "event=coordinator_save module=coordinator status=start coordinator_id={coordinator} mode=sync"
            );
            self.root.perform_and_wait(|session| session.save())??;
            return Ok(());
        }

        info!(
            "event=coordinator_save module=coordinator status=start coordinator_id={coordinator} mode=async"
        );
        let scheduled = self.root.perform(move |session| {
            if let Err(err) = session.save() {
                error!(
                    "event=coordinator_save module=coordinator status=error coordinator_id={coordinator} mode=async error={err}"
                );
            }
        });
        if let Err(err) = scheduled {
            error!(
                "event=coordinator_save module=coordinator status=error coordinator_id={coordinator} mode=async error_code=schedule_failed error={err}"
            );
        }
        Ok(())
    }
}

impl Drop for PersistenceCoordinator {
    /// Drains saves already scheduled on the main queue. Foreground children
    /// still held by callers can no longer run work afterwards.
    fn drop(&mut self) {
        self.main_queue.shutdown();
        info!(
            "event=coordinator_close module=coordinator status=ok coordinator_id={}",
            self.id
        );
    }
}

impl Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("id", &self.id)
            .field("location", self.store.location())
            .field("schema", &self.store.schema().name)
            .field("root", &self.root)
            .finish()
    }
}

fn commit_hook(coordinator: CoordinatorId, observers: Arc<LifecycleObservers>) -> CommitHook {
    Box::new(move |outcome: &ContextResult<ChangeSummary>| match outcome {
        Ok(summary) => observers.emit(&LifecycleEvent::DidSave {
            coordinator,
            summary: *summary,
        }),
        Err(err) => observers.emit(&LifecycleEvent::SaveFailed {
            coordinator,
            error: err.to_string(),
        }),
    })
}
