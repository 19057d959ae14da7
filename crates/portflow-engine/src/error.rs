//! Error types for the port graph engine

use thiserror::Error;

use crate::ids::{NodeId, PortId};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or executing a graph
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// A port or property holds a value of a different type
    #[error("Type mismatch for '{name}': expected {expected}")]
    TypeMismatch { name: String, expected: String },

    /// Node execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// A required service was not registered for this execution
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Node is not part of the graph
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Port is not part of the graph
    #[error("Unknown port: {0}")]
    UnknownPort(PortId),

    /// Node type is not registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Node has no property with this name
    #[error("Node {node} has no property '{name}'")]
    UnknownProperty { node: NodeId, name: String },

    /// A pure dependency of this node failed earlier in the run
    #[error("Upstream node {0} failed")]
    UpstreamFailed(NodeId),

    /// Pure dependencies form a cycle through this node
    #[error("Dependency cycle through node {0}")]
    DependencyCycle(NodeId),

    /// The run invoked more nodes than allowed
    #[error("Execution limit reached ({0} node invocations)")]
    StepLimitExceeded(usize),

    /// A snapshot could not be restored
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Execution was cancelled
    #[error("Execution cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a type mismatch error for a named port or property
    pub fn type_mismatch(name: impl Into<String>, expected: &str) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
        }
    }

    /// Whether this error represents cancellation rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
