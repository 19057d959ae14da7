//! Graph executor: hybrid control flow with pull-evaluated data
//!
//! A run goes `Idle -> Running -> Completed | Cancelled | Faulted`:
//!
//! 1. Initializers populate a fresh [`ServiceContainer`] from the run's
//!    [`Parameters`]. Failures are logged and ignored.
//! 2. Every entry node runs in graph order. Exec outputs it triggers are
//!    followed depth-first: an exec output's link selects the next node, and
//!    an unconnected exec output ends that branch.
//! 3. Before a node runs, each connected data input whose source is a pure
//!    node is brought up to date by evaluating that node and its own pure
//!    sources first, dependencies before dependents. A
//!    pure node runs at most once per run and later pulls reuse its
//!    outputs. Sources with exec ports are never re-run by a pull; their
//!    inputs hold whatever they last pushed.
//! 4. Each node is raced against the cancellation token, and the token is
//!    checked before each node starts. A run ends `Cancelled` only when one
//!    of those checks saw the cancellation. A fault is
//!    reported once through [`ExecutionObserver::on_node_error`] and ends
//!    only its own branch, unless [`ErrorPolicy::CancelRun`] is set.
//!
//! Errors never cross [`GraphExecutor::execute`]: the outcome carries the
//! terminal state, and per-node faults reach the observer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::events::{ExecutionObserver, NodeInfo};
use crate::graph::Graph;
use crate::ids::{NodeId, PortId};
use crate::initializer::{discover_initializers, run_initializers, NodeContextInitializer, Parameters};
use crate::node::Property;
use crate::pool::{rent_set, rent_vec, Pooled};
use crate::port::{ExecOutPort, InputPort, OutputPort};
use crate::services::ServiceContainer;
use crate::value::DataType;

/// State of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Faulted,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Cancelled | ExecutionState::Faulted
        )
    }
}

/// What a node fault does to the rest of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the faulting branch only
    #[default]
    ContinueBranches,
    /// Stop the whole run, ending it `Faulted`
    CancelRun,
}

/// Executor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Maximum node invocations per run, guards against endless exec loops
    pub max_steps: usize,
    pub error_policy: ErrorPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            error_policy: ErrorPolicy::default(),
        }
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub state: ExecutionState,
    /// Node invocations, successful or not
    pub nodes_executed: usize,
    /// Nodes that faulted or could not run, in failure order
    pub failed_nodes: Vec<NodeId>,
    /// Reason for a `Faulted` state
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == ExecutionState::Completed
    }
}

/// Runs a graph
///
/// Obtained from [`Graph::create_executor`]. Holds the graph mutably for its
/// whole lifetime.
pub struct GraphExecutor<'g> {
    graph: &'g mut Graph,
    config: ExecutorConfig,
    parameters: Parameters,
    initializers: Vec<Box<dyn NodeContextInitializer>>,
    state: ExecutionState,
}

impl<'g> GraphExecutor<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        Self {
            graph,
            config: ExecutorConfig::default(),
            parameters: Parameters::new(),
            initializers: discover_initializers(),
            state: ExecutionState::Idle,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.config.error_policy = policy;
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add an initializer after the discovered ones
    pub fn with_initializer(mut self, initializer: impl NodeContextInitializer + 'static) -> Self {
        self.initializers.push(Box::new(initializer));
        self
    }

    /// Drop discovered initializers, keeping only those added explicitly afterwards
    pub fn without_discovered_initializers(mut self) -> Self {
        self.initializers.clear();
        self
    }

    /// State of the latest run
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Execute the graph from its entry nodes
    pub async fn execute(&mut self, observer: &dyn ExecutionObserver, cancel: CancellationToken) -> ExecutionOutcome {
        let start_time = Instant::now();
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());
        self.state = ExecutionState::Running;
        observer.on_execution_start(&execution_id);

        let services = self.prepare_services().await;
        let entries = self.graph.entry_nodes();
        log::info!("Execution {} started with {} entry node(s)", execution_id, entries.len());

        let mut run = Run::new(self.graph, services, observer, cancel, &self.config);
        for entry in entries {
            if run.halt.is_some() {
                break;
            }
            // Faults are already recorded on the run; only halts matter here.
            let _ = run.run_from(Seed::Node(entry)).await;
        }

        let outcome = run.finish(execution_id, start_time);
        self.state = outcome.state;
        log::info!(
            "Execution {} finished: {:?} ({} node(s), {} ms)",
            outcome.execution_id,
            outcome.state,
            outcome.nodes_executed,
            outcome.execution_time_ms
        );
        observer.on_execution_finish(&outcome);
        outcome
    }

    /// Evaluate a pure node and its pure dependencies on demand
    ///
    /// Runs initializers and reports through `observer` like a full run, but
    /// starts from `node` instead of the entry nodes.
    pub async fn evaluate(
        &mut self,
        node: NodeId,
        observer: &dyn ExecutionObserver,
        cancel: CancellationToken,
    ) -> Result<()> {
        let entry = self.graph.nodes.get(&node).ok_or(EngineError::UnknownNode(node))?;
        if !entry.is_pure() {
            return Err(EngineError::failed(format!(
                "node {} ({}) has exec ports and cannot be evaluated on demand",
                node, entry.metadata.node_type
            )));
        }

        self.state = ExecutionState::Running;
        let services = self.prepare_services().await;
        let mut run = Run::new(self.graph, services, observer, cancel, &self.config);
        let result = run.evaluate_pure(node).await;
        self.state = match run.halt {
            Some(Halt::Cancelled) => ExecutionState::Cancelled,
            Some(Halt::Faulted(_)) => ExecutionState::Faulted,
            None if result.is_ok() => ExecutionState::Completed,
            None => ExecutionState::Faulted,
        };
        result
    }

    async fn prepare_services(&self) -> Arc<ServiceContainer> {
        let services = Arc::new(ServiceContainer::new());
        let ready = run_initializers(&self.initializers, &self.parameters, &services).await;
        log::debug!(
            "{}/{} initializer(s) succeeded, {} service(s) registered",
            ready,
            self.initializers.len(),
            services.len()
        );
        services
    }
}

/// Where a traversal begins
enum Seed {
    Node(NodeId),
    Port(PortId),
}

/// A pure node waiting for its dependencies
struct PullFrame {
    id: NodeId,
    deps: Pooled<Vec<NodeId>>,
    next: usize,
}

/// Why a run stopped early
enum Halt {
    Cancelled,
    Faulted(String),
}

/// State of a single execution
struct Run<'r> {
    graph: &'r mut Graph,
    services: Arc<ServiceContainer>,
    observer: &'r dyn ExecutionObserver,
    cancel: CancellationToken,
    config: &'r ExecutorConfig,
    /// Pure nodes evaluated successfully this run
    evaluated: Pooled<HashSet<NodeId>>,
    /// Pure nodes that failed this run
    failed_pure: Pooled<HashSet<NodeId>>,
    /// Pure nodes currently being evaluated, for cycle detection
    evaluating: Pooled<HashSet<NodeId>>,
    steps: usize,
    nodes_executed: usize,
    failed_nodes: Vec<NodeId>,
    halt: Option<Halt>,
}

impl<'r> Run<'r> {
    fn new(
        graph: &'r mut Graph,
        services: Arc<ServiceContainer>,
        observer: &'r dyn ExecutionObserver,
        cancel: CancellationToken,
        config: &'r ExecutorConfig,
    ) -> Self {
        Self {
            graph,
            services,
            observer,
            cancel,
            config,
            evaluated: rent_set(),
            failed_pure: rent_set(),
            evaluating: rent_set(),
            steps: 0,
            nodes_executed: 0,
            failed_nodes: Vec::new(),
            halt: None,
        }
    }

    fn finish(self, execution_id: String, start_time: Instant) -> ExecutionOutcome {
        let (state, error) = match self.halt {
            None => (ExecutionState::Completed, None),
            Some(Halt::Cancelled) => (ExecutionState::Cancelled, None),
            Some(Halt::Faulted(reason)) => (ExecutionState::Faulted, Some(reason)),
        };
        ExecutionOutcome {
            execution_id,
            state,
            nodes_executed: self.nodes_executed,
            failed_nodes: self.failed_nodes,
            error,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        }
    }

    fn halted_error(&self) -> EngineError {
        match &self.halt {
            Some(Halt::Faulted(reason)) => EngineError::ExecutionFailed(reason.clone()),
            _ => EngineError::Cancelled,
        }
    }

    /// Follow control flow from a node or an exec output until it runs out
    ///
    /// Returns an error only when the run halted.
    fn run_from(&mut self, seed: Seed) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut pending = rent_vec::<PortId>();
            match seed {
                Seed::Port(port) => pending.push(port),
                Seed::Node(node) => match self.run_node(node).await {
                    Ok(fired) => pending.extend(fired.into_iter().rev()),
                    Err(_) if self.halt.is_some() => return Err(self.halted_error()),
                    Err(_) => return Ok(()),
                },
            }

            while let Some(port) = pending.pop() {
                let Some(target) = self.graph.exec_target(port) else {
                    continue;
                };
                match self.run_node(target).await {
                    Ok(fired) => pending.extend(fired.into_iter().rev()),
                    Err(_) if self.halt.is_some() => return Err(self.halted_error()),
                    Err(_) => {}
                }
            }
            Ok(())
        })
    }

    /// Check cancellation and the step limit before starting a node
    fn enter_node(&mut self) -> Result<()> {
        if self.halt.is_some() {
            return Err(self.halted_error());
        }
        if self.cancel.is_cancelled() {
            self.halt = Some(Halt::Cancelled);
            return Err(EngineError::Cancelled);
        }
        self.steps += 1;
        if self.steps > self.config.max_steps {
            let error = EngineError::StepLimitExceeded(self.config.max_steps);
            log::warn!("{}", error);
            self.halt = Some(Halt::Faulted(error.to_string()));
            return Err(error);
        }
        Ok(())
    }

    /// Pull inputs, then run the node's logic
    async fn run_node(&mut self, id: NodeId) -> Result<Vec<PortId>> {
        self.enter_node()?;
        if let Err(error) = self.pull_inputs(id).await {
            if self.halt.is_none() {
                let info = self.node_info(id)?;
                self.record_failure(&info, &error);
            }
            return Err(error);
        }
        self.invoke(id).await
    }

    /// Make sure every pure upstream node has been evaluated
    async fn pull_inputs(&mut self, id: NodeId) -> Result<()> {
        for upstream in self.pure_upstream(id).iter().copied() {
            if let Err(error) = self.evaluate_pure(upstream).await {
                return Err(self.blocked_by(upstream, error));
            }
        }
        Ok(())
    }

    /// Evaluate a pure node and its pure dependencies once per run
    ///
    /// Dependencies are resolved post-order on an explicit work stack, so
    /// long chains of pure nodes do not grow the call stack. A node that
    /// already failed this run yields `UpstreamFailed` without running again.
    async fn evaluate_pure(&mut self, root: NodeId) -> Result<()> {
        if let Some(result) = self.memoized(root) {
            return result;
        }
        let mut stack = vec![self.begin_pure(root)?];
        let mut failed: Option<(NodeId, EngineError)> = None;

        while let Some(frame) = stack.last_mut() {
            let id = frame.id;

            if let Some((child, error)) = failed.take() {
                // A dependency failed, so this node fails without running.
                let error = self.blocked_by(child, error);
                stack.pop();
                if self.halt.is_none() {
                    let info = self.node_info(id)?;
                    self.record_failure(&info, &error);
                }
                self.settle(id, false);
                failed = Some((id, error));
                continue;
            }

            if let Some(&dep) = frame.deps.get(frame.next) {
                frame.next += 1;
                match self.memoized(dep) {
                    Some(Ok(())) => {}
                    Some(Err(error)) => failed = Some((dep, error)),
                    None => match self.begin_pure(dep) {
                        Ok(next) => stack.push(next),
                        Err(error) => failed = Some((dep, error)),
                    },
                }
                continue;
            }

            stack.pop();
            match self.invoke(id).await {
                Ok(_) => self.settle(id, true),
                Err(error) => {
                    self.settle(id, false);
                    failed = Some((id, error));
                }
            }
        }

        match failed {
            None => Ok(()),
            Some((_, error)) => Err(error),
        }
    }

    /// Result of a pure node already settled or in progress this run
    fn memoized(&self, id: NodeId) -> Option<Result<()>> {
        if self.evaluated.contains(&id) {
            Some(Ok(()))
        } else if self.failed_pure.contains(&id) {
            Some(Err(EngineError::UpstreamFailed(id)))
        } else if self.evaluating.contains(&id) {
            Some(Err(EngineError::DependencyCycle(id)))
        } else {
            None
        }
    }

    fn begin_pure(&mut self, id: NodeId) -> Result<PullFrame> {
        self.evaluating.insert(id);
        if let Err(error) = self.enter_node() {
            self.evaluating.remove(&id);
            return Err(error);
        }
        Ok(PullFrame {
            id,
            deps: self.pure_upstream(id),
            next: 0,
        })
    }

    fn settle(&mut self, id: NodeId, ok: bool) {
        self.evaluating.remove(&id);
        if ok {
            self.evaluated.insert(id);
        } else if self.halt.is_none() {
            self.failed_pure.insert(id);
        }
    }

    /// Error reported by a consumer whose upstream `source` failed
    fn blocked_by(&self, source: NodeId, error: EngineError) -> EngineError {
        match error {
            _ if self.halt.is_some() => error,
            EngineError::DependencyCycle(node) => EngineError::DependencyCycle(node),
            _ => EngineError::UpstreamFailed(source),
        }
    }

    fn pure_upstream(&self, id: NodeId) -> Pooled<Vec<NodeId>> {
        let mut pure = rent_vec();
        pure.extend(
            self.graph
                .upstream_nodes(id)
                .into_iter()
                .filter(|upstream| self.graph.nodes.get(upstream).is_some_and(|entry| entry.is_pure())),
        );
        pure
    }

    /// Run a node's logic, reporting it to the observer
    async fn invoke(&mut self, id: NodeId) -> Result<Vec<PortId>> {
        let node = self
            .graph
            .nodes
            .get(&id)
            .map(|entry| entry.node.clone())
            .ok_or(EngineError::UnknownNode(id))?;
        let info = self.node_info(id)?;
        let observer = self.observer;
        let cancel = self.cancel.clone();

        self.nodes_executed += 1;
        log::debug!("Node {} ({}) started", id, info.node_type);
        observer.on_node_start(&info);

        let result = {
            let mut ctx = NodeContext::new(self, id);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                result = node.execute(&mut ctx) => result,
            };
            outcome.map(|()| ctx.fired)
        };

        match result {
            Ok(fired) => {
                log::debug!("Node {} ({}) completed", id, info.node_type);
                observer.on_node_complete(&info);
                Ok(fired)
            }
            // A nested branch halted the run; it has already been reported.
            Err(error) if self.halt.is_some() => Err(error),
            Err(EngineError::Cancelled) => {
                log::debug!("Node {} ({}) cancelled", id, info.node_type);
                self.halt = Some(Halt::Cancelled);
                Err(EngineError::Cancelled)
            }
            Err(error) => {
                self.record_failure(&info, &error);
                Err(error)
            }
        }
    }

    fn record_failure(&mut self, info: &NodeInfo, error: &EngineError) {
        log::warn!("Node {} ({}) failed: {}", info.id, info.node_type, error);
        self.observer.on_node_error(info, error);
        self.failed_nodes.push(info.id);
        if self.config.error_policy == ErrorPolicy::CancelRun {
            self.halt = Some(Halt::Faulted(format!(
                "node {} ({}) failed: {}",
                info.id, info.node_type, error
            )));
        }
    }

    fn node_info(&self, id: NodeId) -> Result<NodeInfo> {
        self.graph
            .nodes
            .get(&id)
            .map(|entry| NodeInfo {
                id,
                node_type: entry.metadata.node_type.clone(),
            })
            .ok_or(EngineError::UnknownNode(id))
    }
}

/// What a running node can reach of its run
trait Runner: Send + Sync {
    fn graph(&self) -> &Graph;

    fn graph_mut(&mut self) -> &mut Graph;

    fn services(&self) -> &Arc<ServiceContainer>;

    fn cancellation_token(&self) -> &CancellationToken;

    fn run_branch(&mut self, port: PortId) -> BoxFuture<'_, Result<()>>;
}

impl Runner for Run<'_> {
    fn graph(&self) -> &Graph {
        self.graph
    }

    fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }

    fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn run_branch(&mut self, port: PortId) -> BoxFuture<'_, Result<()>> {
        self.run_from(Seed::Port(port))
    }
}

/// Execution context handed to [`Node::execute`](crate::Node::execute)
pub struct NodeContext<'a> {
    runner: &'a mut (dyn Runner + 'a),
    node: NodeId,
    fired: Vec<PortId>,
}

impl<'a> NodeContext<'a> {
    fn new(runner: &'a mut (dyn Runner + 'a), node: NodeId) -> Self {
        Self {
            runner,
            node,
            fired: Vec::new(),
        }
    }

    /// Id of the running node
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Read an input, failing when it holds no value
    pub fn get<T: DataType>(&self, port: InputPort<T>) -> Result<T> {
        let slot = self
            .runner
            .graph()
            .ports
            .get(&port.id())
            .ok_or(EngineError::UnknownPort(port.id()))?;
        let value = slot
            .value
            .as_ref()
            .ok_or_else(|| EngineError::MissingInput(slot.name.clone()))?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| EngineError::type_mismatch(slot.name.clone(), std::any::type_name::<T>()))
    }

    /// Read an input, `None` when it holds no value
    pub fn try_get<T: DataType>(&self, port: InputPort<T>) -> Option<T> {
        self.runner.graph().input_value(port)
    }

    /// Write an output, pushing the value into every connected input now
    pub fn set<T: DataType>(&mut self, port: OutputPort<T>, value: T) -> Result<()> {
        self.runner.graph_mut().set_output_value(port, value)
    }

    pub fn property<T: DataType>(&self, property: Property<T>) -> Result<T> {
        self.runner.graph().property(self.node, property)
    }

    /// Queue an exec output to follow once this node completes
    ///
    /// Triggered outputs are followed depth-first in trigger order.
    pub fn trigger(&mut self, port: ExecOutPort) {
        self.fired.push(port.id());
    }

    /// Run everything downstream of an exec output before returning
    ///
    /// Used by nodes that need a branch to finish first, such as loops.
    /// Fails only when the run halted, with `Cancelled` for cancellation.
    pub async fn run_branch(&mut self, port: ExecOutPort) -> Result<()> {
        self.runner.run_branch(port.id()).await
    }

    pub fn services(&self) -> &ServiceContainer {
        self.runner.services()
    }

    pub fn get_service<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.runner.services().get_service::<T>()
    }

    pub fn get_required_service<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.runner.services().get_required_service::<T>()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.runner.cancellation_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.runner.cancellation_token().is_cancelled()
    }
}
