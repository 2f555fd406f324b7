//! Work units and the shared queue of unassigned scopes.
//!
//! A work unit is one scope's worth of items, each carrying a completion
//! flag. Units are the atomic thing the scheduler assigns; items inside a
//! unit still complete one at a time. All containers here are insertion
//! ordered so that crash identification and assignment are deterministic.

use indexmap::IndexMap;

use super::scope::split_scope;

/// Grouping key for a work unit: a module path, optionally qualified by a
/// class name.
pub type ScopeKey = String;

/// One scope's items, each mapped to its completion flag
/// (`false` = pending).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkUnit {
    items: IndexMap<String, bool>,
}

impl WorkUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the unit, marked pending.
    pub fn insert_pending(&mut self, item: String) {
        self.items.insert(item, false);
    }

    /// Flip an item's completion flag. Returns false if the item is not part
    /// of this unit.
    pub fn mark_complete(&mut self, item: &str) -> bool {
        match self.items.get_mut(item) {
            Some(completed) => {
                *completed = true;
                true
            }
            None => false,
        }
    }

    /// Number of items still pending.
    pub fn pending(&self) -> usize {
        self.items.values().filter(|completed| !**completed).count()
    }

    /// First pending item in insertion order.
    pub fn first_pending(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|(_, completed)| !**completed)
            .map(|(item, _)| item.as_str())
    }

    /// Iterate items with their completion flags, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.items.iter().map(|(item, completed)| (item.as_str(), *completed))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The work a node currently holds: scope key to work unit, insertion
/// ordered.
pub type Workload = IndexMap<ScopeKey, WorkUnit>;

/// Number of pending items across a whole workload.
pub fn pending_of(workload: &Workload) -> usize {
    workload.values().map(WorkUnit::pending).sum()
}

/// Ordered queue of scopes not yet assigned to any node.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    units: IndexMap<ScopeKey, WorkUnit>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group a collection into scope units, queued largest scope first so
    /// the biggest chunks are handed out while all nodes are still hungry.
    pub fn from_collection(collection: &[String]) -> Self {
        let mut units: IndexMap<ScopeKey, WorkUnit> = IndexMap::new();
        for item in collection {
            let scope = split_scope(item).to_string();
            units.entry(scope).or_default().insert_pending(item.clone());
        }
        units.sort_by(|_, a, _, b| b.len().cmp(&a.len()));
        Self { units }
    }

    /// Peek at the unit at the front of the queue.
    pub fn front(&self) -> Option<&WorkUnit> {
        self.units.first().map(|(_, unit)| unit)
    }

    /// Take the next unit from the front of the queue.
    pub fn pop_first(&mut self) -> Option<(ScopeKey, WorkUnit)> {
        self.units.shift_remove_index(0)
    }

    /// Return a departed node's unfinished units to the queue so surviving
    /// nodes can pick them up. Fully completed units are dropped.
    pub fn requeue(&mut self, workload: Workload) {
        for (scope, unit) in workload {
            if unit.pending() > 0 {
                self.units.insert(scope, unit);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
