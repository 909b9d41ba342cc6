//! Error types for graph construction and ordering.

use thiserror::Error;

/// Errors raised while building or ordering a dependency graph.
///
/// Node keys are rendered to strings so the error type does not carry the
/// graph's key type parameter around.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge referenced a node that was never added
    #[error("unknown node: {node}")]
    UnknownNode {
        /// The missing node key
        node: String,
    },

    /// The graph contains a cycle; the path is closed on its first node
    #[error("cycle detected: {}", cycle_path.join(" -> "))]
    CycleDetected {
        /// Nodes on the cycle, e.g. `[a, b, c, a]`
        cycle_path: Vec<String>,
    },
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
