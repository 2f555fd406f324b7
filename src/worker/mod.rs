//! Worker-side plumbing for the scheduler.
//!
//! The scheduler core never talks to worker processes directly. It only
//! requires a [`WorkerTransport`] capability per node: the ability to ask the
//! worker to run a subset of its own collection and the ability to terminate
//! it. This module provides the transport trait, the stable [`NodeId`] handle
//! issued when a worker connects, and a channel-backed in-process worker used
//! by the `run` subcommand and the integration tests.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::{Result, TestdistError};

/// Stable handle for a live worker connection, issued by the host when the
/// worker becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Capability interface the scheduler needs from a worker connection.
///
/// Implementations own the actual process/transport management; the
/// scheduler only ever issues these two instructions.
pub trait WorkerTransport {
    /// Instruct the worker to execute the given subset of its own reported
    /// collection, by index.
    fn run_subset(&self, indices: &[usize]) -> Result<()>;

    /// Terminate a worker that has no remaining useful work.
    fn terminate(&self) -> Result<()>;
}

/// Instruction sent to an in-process worker task.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    RunSome(Vec<usize>),
    Terminate,
}

/// Event a worker task reports back to the host event loop.
///
/// The host delivers these to the scheduler one at a time, so the scheduler
/// is never re-entered concurrently.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    CollectionReceived {
        node: NodeId,
        items: Vec<String>,
    },
    ItemCompleted {
        node: NodeId,
        item_index: usize,
        duration: f64,
    },
    /// The worker shut down, normally or otherwise.
    Finished {
        node: NodeId,
    },
}

/// [`WorkerTransport`] backed by an in-process command channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    node: NodeId,
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl ChannelTransport {
    pub fn new(node: NodeId, commands: mpsc::UnboundedSender<WorkerCommand>) -> Self {
        Self { node, commands }
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|e| TestdistError::Transport {
                node: self.node,
                message: e.to_string(),
            })
    }
}

impl WorkerTransport for ChannelTransport {
    fn run_subset(&self, indices: &[usize]) -> Result<()> {
        tracing::debug!(node = %self.node, count = indices.len(), "Sending run-subset instruction");
        self.send(WorkerCommand::RunSome(indices.to_vec()))
    }

    fn terminate(&self) -> Result<()> {
        tracing::debug!(node = %self.node, "Sending terminate instruction");
        self.send(WorkerCommand::Terminate)
    }
}

/// Simulated worker task.
///
/// Reports its collection, then executes run-subset instructions by emitting
/// one completion event per index until told to terminate. Stands in for the
/// external process-management collaborator during local runs.
pub async fn run_worker(
    node: NodeId,
    collection: Vec<String>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    tracing::info!(node = %node, items = collection.len(), "Worker collected");
    if events
        .send(WorkerEvent::CollectionReceived {
            node,
            items: collection.clone(),
        })
        .is_err()
    {
        return;
    }

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::RunSome(indices) => {
                for index in indices {
                    // Simulated execution; real workers run the test here.
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    let duration = 0.01 * (1 + index % 7) as f64;
                    if events
                        .send(WorkerEvent::ItemCompleted {
                            node,
                            item_index: index,
                            duration,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }
            WorkerCommand::Terminate => break,
        }
    }

    tracing::info!(node = %node, "Worker finished");
    let _ = events.send(WorkerEvent::Finished { node });
}
