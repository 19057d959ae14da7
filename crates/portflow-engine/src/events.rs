//! Execution observers and event streaming
//!
//! The executor reports progress through [`ExecutionObserver`]. Callbacks are
//! invoked synchronously on the task driving the run, so anything that must
//! reach another thread (a UI, a socket) should hand off through a channel.
//! [`EventSinkObserver`] does exactly that: it turns callbacks into
//! serializable [`ExecutionEvent`]s and forwards them to an [`EventSink`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::executor::{ExecutionOutcome, ExecutionState};
use crate::ids::NodeId;

/// Identity of the node a callback refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub node_type: String,
}

/// Receives execution progress
///
/// All methods default to doing nothing.
pub trait ExecutionObserver: Send + Sync {
    fn on_execution_start(&self, _execution_id: &str) {}

    /// Called immediately before a node's logic runs
    fn on_node_start(&self, _node: &NodeInfo) {}

    /// Called immediately after a node's logic succeeds
    fn on_node_complete(&self, _node: &NodeInfo) {}

    /// Called once when a node faults or cannot run because of a failed dependency
    fn on_node_error(&self, _node: &NodeInfo, _error: &EngineError) {}

    fn on_execution_finish(&self, _outcome: &ExecutionOutcome) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

type NodeCallback = Box<dyn Fn(&NodeInfo) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&NodeInfo, &EngineError) + Send + Sync>;

/// Observer built from closures
#[derive(Default)]
pub struct CallbackObserver {
    on_start: Option<NodeCallback>,
    on_complete: Option<NodeCallback>,
    on_error: Option<ErrorCallback>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_node_start(mut self, f: impl Fn(&NodeInfo) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn with_on_node_complete(mut self, f: impl Fn(&NodeInfo) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn with_on_node_error(mut self, f: impl Fn(&NodeInfo, &EngineError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl ExecutionObserver for CallbackObserver {
    fn on_node_start(&self, node: &NodeInfo) {
        if let Some(f) = &self.on_start {
            f(node);
        }
    }

    fn on_node_complete(&self, node: &NodeInfo) {
        if let Some(f) = &self.on_complete {
            f(node);
        }
    }

    fn on_node_error(&self, node: &NodeInfo, error: &EngineError) {
        if let Some(f) = &self.on_error {
            f(node, error);
        }
    }
}

/// Trait for sending execution events
///
/// This abstracts over the transport mechanism (mpsc channel, log, vector)
/// so the engine can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during graph execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionStarted { execution_id: String },

    #[serde(rename_all = "camelCase")]
    NodeStarted {
        execution_id: String,
        node_id: NodeId,
        node_type: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        execution_id: String,
        node_id: NodeId,
        node_type: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeFailed {
        execution_id: String,
        node_id: NodeId,
        node_type: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionFinished {
        execution_id: String,
        state: ExecutionState,
        nodes_executed: usize,
        execution_time_ms: u64,
        error: Option<String>,
    },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<ExecutionEvent> {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        tokio::sync::mpsc::UnboundedSender::send(self, event).map_err(|_| EventError::channel_closed())
    }
}

/// Adapts observer callbacks into [`ExecutionEvent`]s for a sink
pub struct EventSinkObserver<S: EventSink> {
    sink: S,
    execution_id: Mutex<String>,
}

impl<S: EventSink> EventSinkObserver<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            execution_id: Mutex::new(String::new()),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.sink.send(event) {
            log::warn!("Dropping execution event: {}", e);
        }
    }
}

impl<S: EventSink> ExecutionObserver for EventSinkObserver<S> {
    fn on_execution_start(&self, execution_id: &str) {
        *self.execution_id.lock() = execution_id.to_string();
        self.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution_id.to_string(),
        });
    }

    fn on_node_start(&self, node: &NodeInfo) {
        self.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id.lock().clone(),
            node_id: node.id,
            node_type: node.node_type.clone(),
        });
    }

    fn on_node_complete(&self, node: &NodeInfo) {
        self.emit(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id.lock().clone(),
            node_id: node.id,
            node_type: node.node_type.clone(),
        });
    }

    fn on_node_error(&self, node: &NodeInfo, error: &EngineError) {
        self.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id.lock().clone(),
            node_id: node.id,
            node_type: node.node_type.clone(),
            error: error.to_string(),
        });
    }

    fn on_execution_finish(&self, outcome: &ExecutionOutcome) {
        self.emit(ExecutionEvent::ExecutionFinished {
            execution_id: outcome.execution_id.clone(),
            state: outcome.state,
            nodes_executed: outcome.nodes_executed,
            execution_time_ms: outcome.execution_time_ms,
            error: outcome.error.clone(),
        });
    }
}
