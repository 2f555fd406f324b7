use std::path::PathBuf;

use thiserror::Error;

use crate::worker::NodeId;

#[derive(Error, Debug)]
pub enum TestdistError {
    #[error("bucket plan not found at {path}: {source}")]
    PlanNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bucket plan at {path} is malformed: {source}")]
    PlanFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to walk test tree: {0}")]
    Discovery(#[from] walkdir::Error),

    #[error("node {0} is already registered")]
    NodeAlreadyRegistered(NodeId),

    #[error("node {0} is not registered")]
    UnknownNode(NodeId),

    #[error(
        "schedule() called before all {expected} nodes reported a collection ({reported} so far)"
    )]
    CollectionIncomplete { expected: usize, reported: usize },

    #[error("item index {index} out of range for node {node} ({collected} items collected)")]
    InvalidItemIndex {
        node: NodeId,
        index: usize,
        collected: usize,
    },

    #[error("item {item} is not in the collection reported by node {node}")]
    ItemNotCollected { node: NodeId, item: String },

    #[error("completion reported for item {item} which was never assigned to node {node}")]
    ItemNotAssigned { node: NodeId, item: String },

    #[error("workload of node {0} has pending items but none could be identified as incomplete")]
    CorruptWorkload(NodeId),

    #[error("transport error for node {node}: {message}")]
    Transport { node: NodeId, message: String },
}

pub type Result<T> = std::result::Result<T, TestdistError>;
