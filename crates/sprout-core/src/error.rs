use thiserror::Error;

use crate::tree::FlushReport;
use crate::NodeId;

/// Failure of the mutation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MutationError {
    /// The target node was destroyed. Nothing was changed.
    #[error("node {node:?} was destroyed; mutation ignored")]
    StaleNode { node: NodeId },
    /// Requested from inside the node's own producer. The mutator ran but the
    /// node was not enqueued for another rebuild.
    #[error("node {node:?} requested a mutation while its producer was running")]
    ReentrantMutation { node: NodeId },
    #[error("node {node:?} state is not a {expected}")]
    StateTypeMismatch { node: NodeId, expected: &'static str },
}

impl MutationError {
    pub fn node(&self) -> NodeId {
        match self {
            MutationError::StaleNode { node }
            | MutationError::ReentrantMutation { node }
            | MutationError::StateTypeMismatch { node, .. } => *node,
        }
    }
}

/// A producer callback failed while its node was being diffed.
#[derive(Debug, Error)]
#[error("producer of {component} (node {node:?}) failed: {source}")]
pub struct ProducerError {
    node: NodeId,
    component: &'static str,
    #[source]
    source: anyhow::Error,
}

impl ProducerError {
    pub(crate) fn new(node: NodeId, component: &'static str, source: anyhow::Error) -> Self {
        Self {
            node,
            component,
            source,
        }
    }

    /// The node whose producer failed. It may already be destroyed if it was
    /// part of a subtree that never finished building.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.source
    }

    /// Whether the producer failed because it mutated its own node.
    pub fn is_reentrant_mutation(&self) -> bool {
        matches!(
            self.source.downcast_ref::<MutationError>(),
            Some(MutationError::ReentrantMutation { .. })
        )
    }
}

/// Producer errors that reached the root without meeting an error boundary.
#[derive(Debug, Error)]
#[error("{count} producer error(s) escaped to the root", count = .errors.len())]
pub struct FlushError {
    pub errors: Vec<ProducerError>,
    /// Work that did complete in the same pass.
    pub report: FlushReport,
}
