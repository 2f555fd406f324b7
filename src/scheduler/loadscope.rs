//! Load scheduling across worker nodes, grouping items by scope.
//!
//! All expected nodes report their collections; once every collection is in,
//! the first one reported becomes canonical and distribution starts. Work is
//! tracked per node as scope-keyed work units with per-item completion
//! flags, so a crashed node's workload can be inspected for the exact item
//! that was interrupted.
//!
//! The scheduler is plain synchronous state. It is driven by discrete
//! external events (node ready, node gone, collection received, item
//! completed) which the host must deliver one at a time; it spawns nothing
//! and blocks on nothing. Worker processes themselves are owned by the host,
//! which hands the scheduler a [`WorkerTransport`] capability per node.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::collection::{report_collection_diff, CollectionReporter};
use crate::config::{AssignStrategy, SchedulerConfig};
use crate::error::{Result, TestdistError};
use crate::scheduler::scope::split_scope;
use crate::scheduler::workqueue::{pending_of, WorkQueue, WorkUnit, Workload};
use crate::worker::{NodeId, WorkerTransport};

pub struct LoadScopeScheduler<T: WorkerTransport> {
    config: SchedulerConfig,
    /// The canonical list of items, adopted from the first reported
    /// collection when distribution starts. `None` until then.
    collection: Option<Vec<String>>,
    /// Live worker connections, in registration order.
    nodes: IndexMap<NodeId, T>,
    /// Work currently held by each node.
    assigned_work: IndexMap<NodeId, Workload>,
    /// Ordered collections as reported by each node. Entries are kept after
    /// a node departs so the completion gate stays latched.
    registered_collections: IndexMap<NodeId, Vec<String>>,
    /// Scope units not yet assigned to any node (grouped strategy only).
    workqueue: WorkQueue,
    /// Nodes that were told to terminate and must not receive more work.
    shutting_down: HashSet<NodeId>,
    /// Durations reported with each completion, for the host to fold back
    /// into the bucket plan.
    durations: HashMap<String, f64>,
    reporter: Option<Box<dyn CollectionReporter>>,
}

impl<T: WorkerTransport> LoadScopeScheduler<T> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            collection: None,
            nodes: IndexMap::new(),
            assigned_work: IndexMap::new(),
            registered_collections: IndexMap::new(),
            workqueue: WorkQueue::new(),
            shutting_down: HashSet::new(),
            durations: HashMap::new(),
            reporter: None,
        }
    }

    /// Install the host's sink for collection mismatch reports. Without one,
    /// mismatches are logged as warnings.
    pub fn set_reporter(&mut self, reporter: Box<dyn CollectionReporter>) {
        self.reporter = Some(reporter);
    }

    /// All active nodes, in registration order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.assigned_work.keys().copied().collect()
    }

    /// The canonical collection, once distribution has started.
    pub fn collection(&self) -> Option<&[String]> {
        self.collection.as_deref()
    }

    /// True once the expected number of nodes have reported a collection.
    /// This gates the initial distribution.
    pub fn collection_is_completed(&self) -> bool {
        self.registered_collections.len() >= self.config.num_nodes
    }

    /// True while any node still holds at least one pending item, i.e. the
    /// scheduler is active.
    pub fn has_pending(&self) -> bool {
        self.assigned_work
            .values()
            .any(|workload| pending_of(workload) > 0)
    }

    /// True once collection is complete, no work unit is waiting in the
    /// queue, and every assigned item on every node is marked complete.
    pub fn tests_finished(&self) -> bool {
        if !self.collection_is_completed() {
            return false;
        }
        if !self.workqueue.is_empty() {
            return false;
        }
        self.assigned_work
            .values()
            .all(|workload| pending_of(workload) == 0)
    }

    /// Durations reported so far, keyed by item identifier.
    pub fn durations(&self) -> &HashMap<String, f64> {
        &self.durations
    }

    /// The workload currently held by a node.
    pub fn workload_of(&self, node: NodeId) -> Option<&Workload> {
        self.assigned_work.get(&node)
    }

    /// Register a new node. From now on it may be assigned work units.
    ///
    /// Registering the same node twice is a contract violation and fatal to
    /// the run.
    pub fn add_node(&mut self, node: NodeId, transport: T) -> Result<()> {
        if self.assigned_work.contains_key(&node) {
            return Err(TestdistError::NodeAlreadyRegistered(node));
        }
        tracing::info!(node = %node, "Node registered");
        self.nodes.insert(node, transport);
        self.assigned_work.insert(node, Workload::new());
        Ok(())
    }

    /// Record the ordered list of items a node discovered.
    ///
    /// Requires the node to be registered. A node reporting after the run
    /// has already begun (a late joiner) simply replaces its registry entry;
    /// the canonical collection is not re-derived.
    pub fn add_node_collection(&mut self, node: NodeId, items: Vec<String>) -> Result<()> {
        if !self.assigned_work.contains_key(&node) {
            return Err(TestdistError::UnknownNode(node));
        }
        tracing::debug!(node = %node, items = items.len(), "Collection registered");
        self.registered_collections.insert(node, items);
        Ok(())
    }

    /// Deregister a node, normally or after a crash.
    ///
    /// Returns the item the node was executing when it went down, or `None`
    /// if it held no pending work. Incomplete units are returned to the
    /// work queue (grouped strategy) and every surviving node gets a
    /// reschedule pass.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Option<String>> {
        self.nodes.shift_remove(&node);
        self.shutting_down.remove(&node);
        let workload = self
            .assigned_work
            .shift_remove(&node)
            .ok_or(TestdistError::UnknownNode(node))?;

        if pending_of(&workload) == 0 {
            tracing::info!(node = %node, "Node removed with no pending work");
            return Ok(None);
        }

        // The node crashed; identify the item that was interrupted. A
        // workload that counts pending items but yields none here means the
        // bookkeeping is corrupt, which must never be silently swallowed.
        let crashitem = workload
            .values()
            .find_map(|unit| unit.first_pending().map(str::to_string))
            .ok_or(TestdistError::CorruptWorkload(node))?;
        tracing::warn!(node = %node, item = %crashitem, "Node crashed mid-run");

        if self.config.strategy == AssignStrategy::GroupedByScope {
            self.workqueue.requeue(workload);
        } else {
            tracing::warn!(
                node = %node,
                orphaned = pending_of(&workload),
                "Departed node's items were collected only by that node and cannot be reassigned"
            );
        }

        for peer in self.nodes() {
            self.reschedule(peer)?;
        }
        Ok(Some(crashitem))
    }

    /// Mark an item as completed by a node.
    ///
    /// The index refers into the node's own reported collection. A node may
    /// then be topped up with more work if it has drained below the
    /// low-watermark.
    pub fn mark_test_complete(
        &mut self,
        node: NodeId,
        item_index: usize,
        duration: f64,
    ) -> Result<()> {
        let collection = self
            .registered_collections
            .get(&node)
            .ok_or(TestdistError::UnknownNode(node))?;
        let item = collection
            .get(item_index)
            .ok_or(TestdistError::InvalidItemIndex {
                node,
                index: item_index,
                collected: collection.len(),
            })?
            .clone();

        let scope = split_scope(&item).to_string();
        let workload = self
            .assigned_work
            .get_mut(&node)
            .ok_or(TestdistError::UnknownNode(node))?;
        let completed = workload
            .get_mut(&scope)
            .map(|unit| unit.mark_complete(&item))
            .unwrap_or(false);
        if !completed {
            return Err(TestdistError::ItemNotAssigned { node, item });
        }

        tracing::debug!(node = %node, item = %item, duration, "Item completed");
        self.durations.insert(item, duration);
        self.reschedule(node)
    }

    /// Initiate distribution of the collected items across the nodes.
    ///
    /// Requires [`collection_is_completed`](Self::collection_is_completed).
    /// Calling it again after distribution has started behaves like a
    /// reschedule pass over all nodes, so late joiners start to be used.
    pub fn schedule(&mut self) -> Result<()> {
        if !self.collection_is_completed() {
            return Err(TestdistError::CollectionIncomplete {
                expected: self.config.num_nodes,
                reported: self.registered_collections.len(),
            });
        }

        // Initial distribution already happened. Late joiners that reported
        // zero items are shut down; everyone else gets a reschedule pass.
        if self.collection.is_some() {
            for node in self.nodes() {
                if self.reported_nothing(node) {
                    if !self.shutting_down.contains(&node) {
                        tracing::info!(node = %node, "Shutting down unused node");
                        self.shutdown_node(node)?;
                    }
                    continue;
                }
                self.reschedule(node)?;
            }
            return Ok(());
        }

        // Mismatching collections are reported but tolerated: the first
        // reported collection wins. Nodes seeded from different buckets
        // intentionally collect different subsets.
        self.verify_collections_match();

        let Some(first) = self.registered_collections.values().next() else {
            self.collection = Some(Vec::new());
            return Ok(());
        };
        let collection = first.clone();
        tracing::info!(items = collection.len(), "Adopted canonical collection");
        self.collection = Some(collection.clone());
        if collection.is_empty() {
            return Ok(());
        }

        match self.config.strategy {
            AssignStrategy::FullCollection => self.schedule_full_collections(),
            AssignStrategy::GroupedByScope => self.schedule_grouped(&collection),
        }
    }

    /// Compare every registered collection against the first one reported.
    ///
    /// Differences are surfaced through the installed reporter (or a
    /// warning) and make this return false; they never abort the run.
    pub fn verify_collections_match(&mut self) -> bool {
        let mut entries = self.registered_collections.iter();
        let Some((&first_node, first_collection)) = entries.next() else {
            return true;
        };

        let mut mismatches = Vec::new();
        for (&node, collection) in entries {
            if let Some(diff) = report_collection_diff(
                first_collection,
                collection,
                &first_node.to_string(),
                &node.to_string(),
            ) {
                mismatches.push((node, diff));
            }
        }

        let same_collection = mismatches.is_empty();
        for (node, diff) in mismatches {
            match self.reporter.as_mut() {
                Some(reporter) => reporter.report_collection_mismatch(first_node, node, &diff),
                None => tracing::warn!(first = %first_node, other = %node, %diff, "Collection mismatch"),
            }
        }
        same_collection
    }

    /// Initial assignment for the full-collection strategy: every node runs
    /// the entire index range of its own reported collection; nodes that
    /// collected nothing are shut down since they can never receive work.
    fn schedule_full_collections(&mut self) -> Result<()> {
        let mut idle = Vec::new();
        let mut busy = Vec::new();
        for (&node, collection) in &self.registered_collections {
            if !self.assigned_work.contains_key(&node) {
                continue;
            }
            if collection.is_empty() {
                idle.push(node);
            } else {
                busy.push(node);
            }
        }

        for node in idle {
            tracing::info!(node = %node, "Shutting down unused node");
            self.shutdown_node(node)?;
        }
        for node in busy {
            self.assign_full_collection(node)?;
        }
        Ok(())
    }

    /// Initial assignment for the grouped strategy: build the shared queue
    /// of scope units, shut down surplus nodes, then hand each node one
    /// unit plus a top-up so nodes start with up to two units.
    fn schedule_grouped(&mut self, collection: &[String]) -> Result<()> {
        self.workqueue = WorkQueue::from_collection(collection);
        tracing::info!(scopes = self.workqueue.len(), "Built scope work queue");

        let mut workers = Vec::new();
        for node in self.nodes() {
            if self.reported_nothing(node) {
                tracing::info!(node = %node, "Shutting down unused node");
                self.shutdown_node(node)?;
                continue;
            }
            if self.registered_collections.contains_key(&node) {
                workers.push(node);
            }
        }

        let extra = workers.len().saturating_sub(self.workqueue.len());
        let (active, surplus) = workers.split_at(workers.len() - extra);
        let (active, surplus) = (active.to_vec(), surplus.to_vec());
        for node in surplus {
            tracing::info!(node = %node, "Shutting down surplus node");
            self.shutdown_node(node)?;
        }

        for &node in &active {
            self.assign_work_unit(node)?;
        }
        for &node in &active {
            self.reschedule(node)?;
        }
        Ok(())
    }

    /// Assign a node the full index range of its own collection, tracked as
    /// scope-keyed pending units.
    fn assign_full_collection(&mut self, node: NodeId) -> Result<()> {
        let collection = self
            .registered_collections
            .get(&node)
            .ok_or(TestdistError::UnknownNode(node))?
            .clone();
        let workload = self
            .assigned_work
            .get_mut(&node)
            .ok_or(TestdistError::UnknownNode(node))?;
        for item in &collection {
            workload
                .entry(split_scope(item).to_string())
                .or_insert_with(WorkUnit::new)
                .insert_pending(item.clone());
        }

        let indices: Vec<usize> = (0..collection.len()).collect();
        tracing::info!(node = %node, items = indices.len(), "Assigned full collection");
        self.transport(node)?.run_subset(&indices)
    }

    /// Pull the next unit from the shared queue and assign it to a node.
    /// No-op when the queue is empty.
    fn assign_work_unit(&mut self, node: NodeId) -> Result<()> {
        let Some(unit) = self.workqueue.front() else {
            return Ok(());
        };

        // Indices are resolved against the node's own reported collection
        // before the unit leaves the queue, so a node that did not discover
        // an item fails the assignment without losing the unit.
        let collection = self
            .registered_collections
            .get(&node)
            .ok_or(TestdistError::UnknownNode(node))?;
        let mut indices = Vec::with_capacity(unit.pending());
        for (item, completed) in unit.iter() {
            if completed {
                continue;
            }
            let index = collection.iter().position(|i| i == item).ok_or_else(|| {
                TestdistError::ItemNotCollected {
                    node,
                    item: item.to_string(),
                }
            })?;
            indices.push(index);
        }

        let Some((scope, unit)) = self.workqueue.pop_first() else {
            return Ok(());
        };
        tracing::debug!(node = %node, scope = %scope, items = indices.len(), "Assigned work unit");
        self.assigned_work
            .get_mut(&node)
            .ok_or(TestdistError::UnknownNode(node))?
            .insert(scope, unit);
        self.transport(node)?.run_subset(&indices)
    }

    /// Top a node up with one more unit when global work remains and the
    /// node has drained to the low-watermark. No-op for the full-collection
    /// strategy, for terminating nodes, and for sufficiently loaded nodes.
    fn reschedule(&mut self, node: NodeId) -> Result<()> {
        if self.config.strategy != AssignStrategy::GroupedByScope {
            return Ok(());
        }
        if self.workqueue.is_empty() || self.shutting_down.contains(&node) {
            return Ok(());
        }
        // A late joiner that has not reported a collection yet cannot be
        // given work (indices could not be resolved), and a node that
        // reported nothing never can.
        match self.registered_collections.get(&node) {
            Some(collection) if !collection.is_empty() => {}
            _ => return Ok(()),
        }
        let workload = self
            .assigned_work
            .get(&node)
            .ok_or(TestdistError::UnknownNode(node))?;
        if pending_of(workload) > self.config.low_watermark {
            return Ok(());
        }
        self.assign_work_unit(node)
    }

    /// True when the node reported a collection with zero items. Such a
    /// node can never receive work in either strategy.
    fn reported_nothing(&self, node: NodeId) -> bool {
        self.registered_collections
            .get(&node)
            .is_some_and(|collection| collection.is_empty())
    }

    /// Tell a node to terminate and stop handing it work. The node stays
    /// registered until the host observes it finishing and removes it.
    fn shutdown_node(&mut self, node: NodeId) -> Result<()> {
        self.shutting_down.insert(node);
        self.transport(node)?.terminate()
    }

    fn transport(&self, node: NodeId) -> Result<&T> {
        self.nodes.get(&node).ok_or(TestdistError::UnknownNode(node))
    }
}
