//! Pending change tracking.
//!
//! # Responsibility
//! - Buffer uncommitted inserts, updates and deletes for one context.
//! - Fold a child's changes into its parent's buffer on save.
//!
//! # Invariants
//! - At most one change is recorded per object id.
//! - Insert followed by update stays an insert carrying the newest snapshot.
//! - Insert followed by delete leaves no trace.

use crate::model::object::{ManagedObject, ObjectId};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Last recorded mutation of one object.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(ManagedObject),
    Update(ManagedObject),
    Delete { entity: String },
}

impl Change {
    pub fn entity(&self) -> &str {
        match self {
            Self::Insert(object) | Self::Update(object) => object.entity.as_str(),
            Self::Delete { entity } => entity.as_str(),
        }
    }

    /// Returns the resulting object, or `None` for deletions.
    pub fn object(&self) -> Option<&ManagedObject> {
        match self {
            Self::Insert(object) | Self::Update(object) => Some(object),
            Self::Delete { .. } => None,
        }
    }
}

/// Counts of pending changes by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Ordered buffer of uncommitted object changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<ObjectId, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Change> {
        self.changes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &Change)> {
        self.changes.iter()
    }

    /// Records one change, folding it into any earlier change for the same id.
    pub fn record(&mut self, id: ObjectId, change: Change) {
        match self.changes.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(change);
            }
            Entry::Occupied(mut slot) => {
                let pending_insert = matches!(slot.get(), Change::Insert(_));
                match (pending_insert, change) {
                    (true, Change::Update(object)) => {
                        slot.insert(Change::Insert(object));
                    }
                    (true, Change::Delete { .. }) => {
                        slot.remove();
                    }
                    (_, change) => {
                        slot.insert(change);
                    }
                }
            }
        }
    }

    /// Folds every change of `child` into this set, in id order.
    pub fn merge(&mut self, child: ChangeSet) {
        for (id, change) in child.changes {
            self.record(id, change);
        }
    }

    pub fn take(&mut self) -> ChangeSet {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in self.changes.values() {
            match change {
                Change::Insert(_) => summary.inserted += 1,
                Change::Update(_) => summary.updated += 1,
                Change::Delete { .. } => summary.deleted += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::{Change, ChangeSet};
    use crate::model::object::{values, ManagedObject};

    fn book(title: &str) -> ManagedObject {
        ManagedObject::new("Book", values([("title", title)]))
    }

    #[test]
    fn insert_then_update_stays_insert_with_latest_values() {
        let draft = book("draft");
        let mut revised = draft.clone();
        revised.values = values([("title", "final")]);

        let mut changes = ChangeSet::new();
        changes.record(draft.id, Change::Insert(draft.clone()));
        changes.record(draft.id, Change::Update(revised.clone()));

        assert_eq!(changes.get(draft.id), Some(&Change::Insert(revised)));
        assert_eq!(changes.summary().inserted, 1);
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let draft = book("scratch");
        let mut changes = ChangeSet::new();
        changes.record(draft.id, Change::Insert(draft.clone()));
        changes.record(
            draft.id,
            Change::Delete {
                entity: "Book".to_string(),
            },
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn merge_lets_child_changes_win() {
        let stored = book("stored");
        let mut parent = ChangeSet::new();
        parent.record(stored.id, Change::Update(stored.clone()));

        let mut edited = stored.clone();
        edited.values = values([("title", "edited")]);
        let mut child = ChangeSet::new();
        child.record(stored.id, Change::Update(edited.clone()));
        let fresh = book("fresh");
        child.record(fresh.id, Change::Insert(fresh.clone()));

        parent.merge(child);

        assert_eq!(parent.get(stored.id), Some(&Change::Update(edited)));
        assert_eq!(parent.get(fresh.id), Some(&Change::Insert(fresh)));
        let summary = parent.summary();
        assert_eq!((summary.inserted, summary.updated, summary.deleted), (1, 1, 0));
    }
}
