//! Portflow Engine - typed port graphs with hybrid execution
//!
//! This crate provides the runtime core of a node-based visual programming
//! system. It supports:
//!
//! - Typed data ports with automatic conversions between compatible types
//! - Control-flow (exec) ports driving execution order
//! - Pull evaluation of pure nodes, memoized once per run
//! - Cooperative cancellation and per-branch fault isolation
//! - Per-run service containers populated by initializers
//! - JSON snapshots that restore graphs with stable ids
//!
//! # Architecture
//!
//! - `Graph`: owns nodes and the port arena, validates connections
//! - `ConversionResolver`: decides and caches how values cross type boundaries
//! - `GraphExecutor`: walks exec links depth-first and pulls data on demand
//! - `NodeRegistry`: maps type names to constructors for snapshots and tools
//! - `ExecutionObserver`/`EventSink`: progress reporting, not tied to a host
//!
//! # Example
//!
//! ```ignore
//! use portflow_engine::{Graph, NoopObserver};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut graph = Graph::new();
//! let start = graph.add_node::<StartNode>();
//! let print = graph.add_node::<PrintNode>();
//! graph.connect(start.then, print.exec);
//!
//! let outcome = graph
//!     .create_executor()
//!     .execute(&NoopObserver, CancellationToken::new())
//!     .await;
//! ```

pub mod conversion;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod ids;
pub mod initializer;
pub mod node;
pub mod pool;
pub mod port;
pub mod registry;
pub mod services;
pub mod snapshot;
pub mod value;

// Re-export key types
pub use conversion::{Conversion, ConversionKind, ConversionResolver};
pub use error::{EngineError, Result};
pub use events::{
    CallbackObserver, EventError, EventSink, EventSinkObserver, ExecutionEvent, ExecutionObserver, NodeInfo,
    NoopObserver, NullEventSink, VecEventSink,
};
pub use executor::{ErrorPolicy, ExecutionOutcome, ExecutionState, ExecutorConfig, GraphExecutor, NodeContext};
pub use graph::{Connection, Graph};
pub use ids::{NodeId, PortId};
pub use initializer::{
    discover_initializers, InitializerContext, InitializerRegistration, NodeContextInitializer, Parameters,
    ServiceInstance,
};
pub use node::{Node, NodeBuilder, NodeCategory, NodeMetadata, NodeRef, NodeType, NodeView, Property};
pub use port::{Cardinality, ExecInPort, ExecOutPort, InputPort, OutputPort, PortKind, PortView};
pub use registry::{NodeConstructor, NodeRegistration, NodeRegistry};
pub use services::ServiceContainer;
pub use snapshot::{GraphSnapshot, InputSnapshot, NodeSnapshot, PropertySnapshot};
pub use value::{AnyValue, DataType, DynValue, ValueType};
