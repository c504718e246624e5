//! Queue-confined object-graph contexts.
//!
//! # Responsibility
//! - Buffer uncommitted changes per context.
//! - Resolve reads through local changes, then the parent chain, then the
//!   store.
//! - Propagate saves one level up: child -> parent queue, root -> store.
//!
//! # Invariants
//! - Context state is only mutated from jobs running on the context's queue;
//!   `Session` is the only handle that exposes mutation.
//! - A child's changes reach its parent only through `Session::save()`.
//! - Parents never read or mutate a child's pending changes.
//! - Every context keeps its parent chain (and so the store) alive.
//! - A save holds the saving context's pending lock until its changes are
//!   applied one level up and cleared; reads take the same locks from the
//!   reading context up to the store, so a change that is being saved is
//!   never missing from a read.

use crate::engine::{EngineError, Store};
use crate::model::change_set::{ChangeSet, ChangeSummary};
use crate::model::object::{FetchRequest, ManagedObject, ObjectId};
use crate::queue::{DispatchQueue, QueueError};
use crate::schema::{Schema, ValidationError};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

mod session;

pub use session::Session;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

pub type ContextResult<T> = Result<T, ContextError>;

/// Observer invoked after every root commit attempt that had changes.
pub(crate) type CommitHook = Box<dyn Fn(&ContextResult<ChangeSummary>) + Send + Sync>;

/// Execution discipline of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyKind {
    /// Confined to the coordinator's shared main queue.
    Main,
    /// Confined to a private serial queue owned by the context.
    Background,
}

/// Context operation failure.
#[derive(Debug)]
pub enum ContextError {
    Validation(ValidationError),
    ObjectNotFound(ObjectId),
    Engine(EngineError),
    Queue(QueueError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::Engine(err) => write!(f, "{err}"),
            Self::Queue(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::ObjectNotFound(_) => None,
            Self::Engine(err) => Some(err),
            Self::Queue(err) => Some(err),
        }
    }
}

impl From<ValidationError> for ContextError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<EngineError> for ContextError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<QueueError> for ContextError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

enum Parent {
    Store(Arc<dyn Store>),
    Context(Context),
}

struct ContextInner {
    id: u64,
    name: String,
    kind: ConcurrencyKind,
    queue: Arc<DispatchQueue>,
    parent: Parent,
    pending: Mutex<ChangeSet>,
    on_commit: Option<CommitHook>,
}

/// Handle to one context. Clones share the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a context bound directly to `store`.
    pub(crate) fn new_root(
        name: impl Into<String>,
        queue: Arc<DispatchQueue>,
        store: Arc<dyn Store>,
        on_commit: Option<CommitHook>,
    ) -> Self {
        Self::build(
            name.into(),
            ConcurrencyKind::Main,
            queue,
            Parent::Store(store),
            on_commit,
        )
    }

    /// Creates a child whose parent is `self`.
    pub(crate) fn new_child(
        &self,
        name: impl Into<String>,
        kind: ConcurrencyKind,
        queue: Arc<DispatchQueue>,
    ) -> Self {
        Self::build(
            name.into(),
            kind,
            queue,
            Parent::Context(self.clone()),
            None,
        )
    }

    /// Creates a child of this context on its own new serial queue.
    ///
    /// Lets callers build deeper chains (e.g. a scratch context under a
    /// background child); saves still travel one level at a time.
    pub fn new_background_child(&self) -> ContextResult<Context> {
        let queue = DispatchQueue::new(format!("{}.child", self.inner.queue.label()))?;
        Ok(self.new_child(
            format!("{}.child", self.inner.name),
            ConcurrencyKind::Background,
            queue,
        ))
    }

    fn build(
        name: String,
        kind: ConcurrencyKind,
        queue: Arc<DispatchQueue>,
        parent: Parent,
        on_commit: Option<CommitHook>,
    ) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "event=context_create module=context status=ok context_id={id} name={name} kind={kind:?} queue={}",
            queue.label()
        );
        Self {
            inner: Arc::new(ContextInner {
                id,
                name,
                kind,
                queue,
                parent,
                pending: Mutex::new(ChangeSet::new()),
                on_commit,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ConcurrencyKind {
        self.inner.kind
    }

    /// Label of the queue this context is confined to.
    pub fn queue_label(&self) -> &str {
        self.inner.queue.label()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.inner.parent, Parent::Store(_))
    }

    pub fn parent(&self) -> Option<Context> {
        match &self.inner.parent {
            Parent::Store(_) => None,
            Parent::Context(parent) => Some(parent.clone()),
        }
    }

    /// Returns whether both handles point to the same context.
    pub fn same_context(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn schema(&self) -> &Schema {
        self.store().schema()
    }

    /// Enqueues `work` on this context's queue and returns immediately.
    pub fn perform<F>(&self, work: F) -> ContextResult<()>
    where
        F: FnOnce(&mut Session<'_>) + Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.dispatch_async(move || {
            let mut session = Session::new(&context);
            work(&mut session);
        })?;
        Ok(())
    }

    /// Runs `work` on this context's queue and waits for its result.
    ///
    /// Runs inline when already called from this context's queue.
    pub fn perform_and_wait<T, F>(&self, work: F) -> ContextResult<T>
    where
        F: FnOnce(&mut Session<'_>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = self.clone();
        let value = self.inner.queue.dispatch_sync(move || {
            let mut session = Session::new(&context);
            work(&mut session)
        })?;
        Ok(value)
    }

    fn store(&self) -> &Arc<dyn Store> {
        match &self.inner.parent {
            Parent::Store(store) => store,
            Parent::Context(parent) => parent.store(),
        }
    }

    // Lock order is descendant -> ancestor -> store connection. Each level's
    // pending lock is held while its ancestors are read, so a save that
    // moves changes up one level is never observed half-done.
    fn resolve(&self, id: ObjectId) -> ContextResult<Option<ManagedObject>> {
        let pending = self.inner.pending.lock();
        if let Some(change) = pending.get(id) {
            return Ok(change.object().cloned());
        }

        match &self.inner.parent {
            Parent::Store(store) => Ok(store.get(id)?),
            Parent::Context(parent) => parent.resolve(id),
        }
    }

    fn collect(&self, request: &FetchRequest) -> ContextResult<BTreeMap<ObjectId, ManagedObject>> {
        let pending = self.inner.pending.lock();
        let mut visible: BTreeMap<ObjectId, ManagedObject> = match &self.inner.parent {
            Parent::Store(store) => {
                let unbounded = FetchRequest {
                    limit: None,
                    ..request.clone()
                };
                store
                    .fetch(&unbounded)?
                    .into_iter()
                    .map(|object| (object.id, object))
                    .collect()
            }
            Parent::Context(parent) => parent.collect(request)?,
        };

        for (id, change) in pending.iter() {
            if change.entity() != request.entity {
                continue;
            }
            match change.object() {
                Some(object) => {
                    visible.insert(*id, object.clone());
                }
                None => {
                    visible.remove(id);
                }
            }
        }
        Ok(visible)
    }

    /// Saves pending changes one level up. Must run on this context's queue.
    ///
    /// The pending lock is held until the changes are either committed and
    /// cleared or rejected, and released before the commit hook runs.
    fn save_pending(&self) -> ContextResult<ChangeSummary> {
        let mut pending = self.inner.pending.lock();
        if pending.is_empty() {
            debug!(
                "event=context_save module=context status=skipped context_id={} reason=no_changes",
                self.inner.id
            );
            return Ok(ChangeSummary::default());
        }

        let started_at = Instant::now();
        let summary = pending.summary();
        let (target, result) = match &self.inner.parent {
            Parent::Store(store) => ("store", store.commit(&pending).map_err(ContextError::from)),
            Parent::Context(parent) => {
                let receiver = parent.clone();
                let changes = pending.clone();
                let delivered = parent
                    .inner
                    .queue
                    .dispatch_sync(move || receiver.inner.pending.lock().merge(changes))
                    .map_err(ContextError::from);
                ("parent", delivered)
            }
        };
        if result.is_ok() {
            pending.clear();
        }
        drop(pending);

        let outcome = match result {
            Ok(()) => {
                info!(
                    "event=context_save module=context status=ok context_id={} target={target} inserted={} updated={} deleted={} duration_ms={}",
                    self.inner.id,
                    summary.inserted,
                    summary.updated,
                    summary.deleted,
                    started_at.elapsed().as_millis()
                );
                Ok(summary)
            }
            Err(err) => {
                error!(
                    "event=context_save module=context status=error context_id={} target={target} duration_ms={} error={}",
                    self.inner.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        };

        if let Some(hook) = &self.inner.on_commit {
            hook(&outcome);
        }
        outcome
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("queue", &self.inner.queue.label())
            .field("is_root", &self.is_root())
            .finish()
    }
}
