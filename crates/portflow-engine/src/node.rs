//! Node contract and construction
//!
//! A node type declares its ports and properties once, in
//! [`NodeType::create`], through a [`NodeBuilder`]. The builder hands back
//! typed handles the node keeps in its own fields and uses later from
//! [`Node::execute`]. Declaration order is the port's position and stays
//! stable for the node's lifetime.
//!
//! Nodes without exec ports are pure: they run only when a consumer pulls
//! their outputs. Nodes with exec ports run when control reaches them.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::executor::NodeContext;
use crate::ids::{NodeId, PortId};
use crate::port::{ExecInPort, ExecOutPort, InputPort, OutputPort, PortKind, PortSlot};
use crate::value::{BoxValue, DataType, ValueType};

/// Category of a node, used for grouping in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points that start execution
    Event,
    /// Branching, sequencing and loops
    Control,
    /// Constants and value sources
    Data,
    Math,
    Chat,
    Debug,
}

/// Descriptor of a node type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Registry key, also stored in snapshots
    pub node_type: String,
    pub category: NodeCategory,
    pub label: String,
    pub description: String,
    /// Execution starts at every node whose type sets this
    #[serde(default)]
    pub entry: bool,
}

/// Runtime behaviour of a node
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Compute outputs from inputs and trigger exec outputs
    ///
    /// Inputs are up to date when this is called. Values written with
    /// [`NodeContext::set`] reach connected inputs immediately.
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()>;
}

/// A node type that can be instantiated by a graph or registry
pub trait NodeType: Node + Sized {
    fn metadata() -> NodeMetadata;

    /// Declare ports and properties and build the node
    fn create(builder: &mut NodeBuilder) -> Self;
}

/// Handle to a node property of type `T`
pub struct Property<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T> {
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Property<T> {}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property<{}>({})", std::any::type_name::<T>(), self.index)
    }
}

/// Stored property value
pub(crate) struct PropertySlot {
    pub name: String,
    pub value_type: ValueType,
    pub value: BoxValue,
}

/// Port ids to reuse when a node is restored from a snapshot
#[derive(Debug, Default)]
pub(crate) struct SavedLayout {
    pub inputs: VecDeque<PortId>,
    pub outputs: VecDeque<PortId>,
    pub exec_inputs: VecDeque<PortId>,
    pub exec_outputs: VecDeque<PortId>,
}

impl SavedLayout {
    fn queue(&mut self, kind: PortKind) -> &mut VecDeque<PortId> {
        match kind {
            PortKind::Input => &mut self.inputs,
            PortKind::Output => &mut self.outputs,
            PortKind::ExecIn => &mut self.exec_inputs,
            PortKind::ExecOut => &mut self.exec_outputs,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.inputs.is_empty()
            && self.outputs.is_empty()
            && self.exec_inputs.is_empty()
            && self.exec_outputs.is_empty()
    }
}

/// Collects the ports and properties a node declares
pub struct NodeBuilder {
    node_id: NodeId,
    ports: Vec<PortSlot>,
    properties: Vec<PropertySlot>,
    saved: Option<SavedLayout>,
    layout_mismatch: bool,
}

/// Output of a finished [`NodeBuilder`]
pub(crate) struct BuiltLayout {
    pub ports: Vec<PortSlot>,
    pub properties: Vec<PropertySlot>,
}

impl NodeBuilder {
    pub(crate) fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ports: Vec::new(),
            properties: Vec::new(),
            saved: None,
            layout_mismatch: false,
        }
    }

    pub(crate) fn restoring(node_id: NodeId, saved: SavedLayout) -> Self {
        Self {
            saved: Some(saved),
            ..Self::new(node_id)
        }
    }

    /// Id of the node being built
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn input<T: DataType>(&mut self, name: &str) -> InputPort<T> {
        let id = self.next_id(PortKind::Input);
        self.ports.push(PortSlot::data(
            id,
            self.node_id,
            name,
            PortKind::Input,
            ValueType::of::<T>(),
        ));
        InputPort::new(id)
    }

    /// Input holding `default` until something else is written to it
    pub fn input_with_default<T: DataType>(&mut self, name: &str, default: T) -> InputPort<T> {
        let port = self.input::<T>(name);
        if let Some(slot) = self.ports.last_mut() {
            slot.value = Some(Box::new(default));
        }
        port
    }

    pub fn output<T: DataType>(&mut self, name: &str) -> OutputPort<T> {
        let id = self.next_id(PortKind::Output);
        self.ports.push(PortSlot::data(
            id,
            self.node_id,
            name,
            PortKind::Output,
            ValueType::of::<T>(),
        ));
        OutputPort::new(id)
    }

    pub fn exec_in(&mut self, name: &str) -> ExecInPort {
        let id = self.next_id(PortKind::ExecIn);
        self.ports
            .push(PortSlot::exec(id, self.node_id, name, PortKind::ExecIn));
        ExecInPort::new(id)
    }

    pub fn exec_out(&mut self, name: &str) -> ExecOutPort {
        let id = self.next_id(PortKind::ExecOut);
        self.ports
            .push(PortSlot::exec(id, self.node_id, name, PortKind::ExecOut));
        ExecOutPort::new(id)
    }

    /// Declare a property settable outside execution
    pub fn property<T: DataType>(&mut self, name: &str, default: T) -> Property<T> {
        self.properties.push(PropertySlot {
            name: name.to_string(),
            value_type: ValueType::of::<T>(),
            value: Box::new(default),
        });
        Property {
            index: self.properties.len() - 1,
            _marker: PhantomData,
        }
    }

    fn next_id(&mut self, kind: PortKind) -> PortId {
        match self.saved.as_mut() {
            Some(saved) => match saved.queue(kind).pop_front() {
                Some(id) => id,
                None => {
                    self.layout_mismatch = true;
                    PortId::new()
                }
            },
            None => PortId::new(),
        }
    }

    pub(crate) fn finish(self) -> Result<BuiltLayout> {
        let leftover = self.saved.as_ref().is_some_and(|saved| !saved.is_exhausted());
        if self.layout_mismatch || leftover {
            return Err(EngineError::InvalidSnapshot(format!(
                "port layout of node {} does not match its type",
                self.node_id
            )));
        }
        Ok(BuiltLayout {
            ports: self.ports,
            properties: self.properties,
        })
    }
}

/// Graph-owned record of a node
pub(crate) struct NodeEntry {
    pub id: NodeId,
    pub node: Arc<dyn Node>,
    pub metadata: NodeMetadata,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    pub exec_inputs: Vec<PortId>,
    pub exec_outputs: Vec<PortId>,
    pub properties: Vec<PropertySlot>,
}

impl NodeEntry {
    /// No exec ports: evaluated on demand only
    pub fn is_pure(&self) -> bool {
        self.exec_inputs.is_empty() && self.exec_outputs.is_empty()
    }

    pub fn port_ids(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.exec_inputs)
            .chain(&self.exec_outputs)
            .copied()
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// Read-only view of a node in a graph
#[derive(Clone, Copy)]
pub struct NodeView<'g> {
    entry: &'g NodeEntry,
}

impl<'g> NodeView<'g> {
    pub(crate) fn new(entry: &'g NodeEntry) -> Self {
        Self { entry }
    }

    pub fn id(&self) -> NodeId {
        self.entry.id
    }

    pub fn node_type(&self) -> &'g str {
        &self.entry.metadata.node_type
    }

    pub fn metadata(&self) -> &'g NodeMetadata {
        &self.entry.metadata
    }

    pub fn inputs(&self) -> &'g [PortId] {
        &self.entry.inputs
    }

    pub fn outputs(&self) -> &'g [PortId] {
        &self.entry.outputs
    }

    pub fn exec_inputs(&self) -> &'g [PortId] {
        &self.entry.exec_inputs
    }

    pub fn exec_outputs(&self) -> &'g [PortId] {
        &self.entry.exec_outputs
    }

    pub fn is_pure(&self) -> bool {
        self.entry.is_pure()
    }

    pub fn property_names(&self) -> Vec<&'g str> {
        self.entry
            .properties
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.entry.id)
            .field("node_type", &self.entry.metadata.node_type)
            .finish()
    }
}

/// Typed handle returned when adding a node, derefs to the node itself
pub struct NodeRef<N> {
    id: NodeId,
    node: Arc<N>,
}

impl<N> NodeRef<N> {
    pub(crate) fn new(id: NodeId, node: Arc<N>) -> Self {
        Self { id, node }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<N> Clone for NodeRef<N> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: self.node.clone(),
        }
    }
}

impl<N> Deref for NodeRef<N> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.node
    }
}

impl<N> fmt::Debug for NodeRef<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef<{}>({})", std::any::type_name::<N>(), self.id)
    }
}

impl<N> From<&NodeRef<N>> for NodeId {
    fn from(node: &NodeRef<N>) -> Self {
        node.id
    }
}
