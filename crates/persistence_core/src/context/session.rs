//! Queue-bound access to one context.
//!
//! # Responsibility
//! - Expose reads, writes and save for the context whose queue is running
//!   the current job.
//!
//! # Invariants
//! - Writes are validated against the schema before they are recorded.
//! - Written references must resolve, from this context, to a visible object
//!   of the relationship's destination entity. Deleting an object does not
//!   rewrite references that point at it.
//! - `Value::Null` in an update removes the property.

use super::{Context, ContextError, ContextResult};
use crate::model::change_set::{Change, ChangeSummary};
use crate::model::object::{FetchRequest, ManagedObject, ObjectId, Value, Values};
use crate::schema::ValidationError;
use log::debug;

/// Borrowed view of a context, only constructed on the context's queue.
pub struct Session<'a> {
    context: &'a Context,
}

impl<'a> Session<'a> {
    pub(super) fn new(context: &'a Context) -> Self {
        Self { context }
    }

    /// The context this session operates on.
    pub fn context(&self) -> &Context {
        self.context
    }

    /// Inserts a new object of `entity` and returns its id.
    pub fn insert(&mut self, entity: &str, values: Values) -> ContextResult<ObjectId> {
        self.context.schema().validate_object(entity, &values)?;
        self.check_references(entity, &values)?;
        let object = ManagedObject::new(entity, values);
        let id = object.id;
        self.record(id, Change::Insert(object));
        debug!(
            "event=object_insert module=context status=ok context_id={} entity={entity} object_id={id}",
            self.context.id()
        );
        Ok(id)
    }

    /// Applies `changes` on top of the object's current visible values.
    pub fn update(&mut self, id: ObjectId, changes: Values) -> ContextResult<()> {
        let mut object = self
            .context
            .resolve(id)?
            .ok_or(ContextError::ObjectNotFound(id))?;
        self.check_references(&object.entity, &changes)?;
        for (name, value) in changes {
            if value.is_null() {
                object.values.remove(&name);
            } else {
                object.values.insert(name, value);
            }
        }
        self.context
            .schema()
            .validate_object(&object.entity, &object.values)?;
        self.record(id, Change::Update(object));
        Ok(())
    }

    /// Marks a visible object as deleted.
    pub fn delete(&mut self, id: ObjectId) -> ContextResult<()> {
        let object = self
            .context
            .resolve(id)?
            .ok_or(ContextError::ObjectNotFound(id))?;
        self.record(
            id,
            Change::Delete {
                entity: object.entity,
            },
        );
        Ok(())
    }

    /// Reads one object as seen from this context.
    pub fn get(&self, id: ObjectId) -> ContextResult<Option<ManagedObject>> {
        self.context.resolve(id)
    }

    /// Fetches objects as seen from this context, ordered by id.
    pub fn fetch(&self, request: &FetchRequest) -> ContextResult<Vec<ManagedObject>> {
        let visible = self.context.collect(request)?;
        Ok(request.apply(visible.into_values()))
    }

    pub fn has_changes(&self) -> bool {
        !self.context.inner.pending.lock().is_empty()
    }

    pub fn pending_summary(&self) -> ChangeSummary {
        self.context.inner.pending.lock().summary()
    }

    /// Discards every uncommitted change of this context.
    pub fn rollback(&mut self) {
        let discarded = self.context.inner.pending.lock().take();
        debug!(
            "event=context_rollback module=context status=ok context_id={} discarded={}",
            self.context.id(),
            discarded.len()
        );
    }

    /// Pushes pending changes one level up.
    ///
    /// Children merge into their parent on the parent's queue; the root
    /// commits to the store. Returns what was saved.
    pub fn save(&mut self) -> ContextResult<ChangeSummary> {
        self.context.save_pending()
    }

    /// Checks relationship values in `values` against what this context sees.
    fn check_references(&self, entity: &str, values: &Values) -> ContextResult<()> {
        let Some(description) = self.context.schema().entity(entity) else {
            return Ok(());
        };
        for (name, value) in values {
            let Some(relationship) = description.find_relationship(name) else {
                continue;
            };
            let targets: &[ObjectId] = match value {
                Value::Reference(target) => std::slice::from_ref(target),
                Value::ReferenceList(targets) => targets.as_slice(),
                _ => continue,
            };
            for target in targets {
                let resolved = self.context.resolve(*target)?;
                if !matches!(resolved, Some(object) if object.entity == relationship.destination) {
                    return Err(ValidationError::InvalidReference {
                        entity: entity.to_string(),
                        property: name.clone(),
                        target: *target,
                        destination: relationship.destination.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, id: ObjectId, change: Change) {
        self.context.inner.pending.lock().record(id, change);
    }
}
