//! Graph: nodes, the port arena, and connections
//!
//! The graph exclusively owns its nodes and their ports. Nodes keep
//! insertion order. Connections are not stored separately: each endpoint
//! port holds a link to its peer, and [`Graph::connections`] derives the
//! connection list from those links.
//!
//! Editing is cheap and silent. [`Graph::connect`] returns `false` for an
//! illegal pair and leaves both ports untouched.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::conversion::{self, Conversion, ConversionResolver};
use crate::error::{EngineError, Result};
use crate::executor::GraphExecutor;
use crate::ids::{NodeId, PortId};
use crate::node::{NodeBuilder, NodeEntry, NodeMetadata, NodeRef, NodeType, NodeView, Property};
use crate::pool::{rent_set, rent_vec};
use crate::port::{Cardinality, InputPort, Link, OutputPort, PortKind, PortSlot, PortView};
use crate::registry::NodeRegistry;
use crate::value::{BoxValue, DataType};

/// A directed connection from a source port to a sink port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// `Output` or `ExecOut` port
    pub source: PortId,
    /// `Input` or `ExecIn` port
    pub target: PortId,
}

/// A graph of nodes connected through typed ports
pub struct Graph {
    pub(crate) nodes: IndexMap<NodeId, NodeEntry>,
    pub(crate) ports: HashMap<PortId, PortSlot>,
    resolver: Arc<ConversionResolver>,
}

impl Graph {
    /// Create an empty graph using the process-wide conversion resolver
    pub fn new() -> Self {
        Self::with_resolver(conversion::global())
    }

    pub fn with_resolver(resolver: Arc<ConversionResolver>) -> Self {
        Self {
            nodes: IndexMap::new(),
            ports: HashMap::new(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &Arc<ConversionResolver> {
        &self.resolver
    }

    // ---- nodes ----

    /// Add a node of type `N`, returning a handle to its ports
    pub fn add_node<N: NodeType>(&mut self) -> NodeRef<N> {
        let id = NodeId::new();
        let mut builder = NodeBuilder::new(id);
        let node = Arc::new(N::create(&mut builder));
        let inserted = self.insert_node(id, N::metadata(), node.clone(), builder);
        debug_assert!(inserted.is_ok(), "fresh ids cannot collide");
        NodeRef::new(id, node)
    }

    /// Add a node by registered type name
    pub fn add_node_of_type(&mut self, registry: &NodeRegistry, node_type: &str) -> Result<NodeId> {
        let id = NodeId::new();
        self.add_registered(registry, node_type, NodeBuilder::new(id))?;
        Ok(id)
    }

    pub(crate) fn add_registered(
        &mut self,
        registry: &NodeRegistry,
        node_type: &str,
        mut builder: NodeBuilder,
    ) -> Result<()> {
        let (metadata, construct) = registry
            .constructor(node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))?;
        let id = builder.node_id();
        let node = construct(&mut builder);
        self.insert_node(id, metadata.clone(), node, builder)
    }

    fn insert_node(
        &mut self,
        id: NodeId,
        metadata: NodeMetadata,
        node: Arc<dyn crate::node::Node>,
        builder: NodeBuilder,
    ) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(EngineError::InvalidSnapshot(format!("duplicate node id {}", id)));
        }
        let layout = builder.finish()?;
        let mut seen = rent_set::<PortId>();
        if let Some(dup) = layout
            .ports
            .iter()
            .find(|p| self.ports.contains_key(&p.id) || !seen.insert(p.id))
        {
            return Err(EngineError::InvalidSnapshot(format!("duplicate port id {}", dup.id)));
        }

        let mut entry = NodeEntry {
            id,
            node,
            metadata,
            inputs: Vec::new(),
            outputs: Vec::new(),
            exec_inputs: Vec::new(),
            exec_outputs: Vec::new(),
            properties: layout.properties,
        };
        for slot in layout.ports {
            match slot.kind {
                PortKind::Input => entry.inputs.push(slot.id),
                PortKind::Output => entry.outputs.push(slot.id),
                PortKind::ExecIn => entry.exec_inputs.push(slot.id),
                PortKind::ExecOut => entry.exec_outputs.push(slot.id),
            }
            self.ports.insert(slot.id, slot);
        }

        log::debug!("Added node {} ({})", id, entry.metadata.node_type);
        self.nodes.insert(id, entry);
        Ok(())
    }

    /// Remove a node, severing every connection to its ports first
    ///
    /// Returns `false` if the node is not in the graph.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(entry) = self.nodes.get(&id) else {
            return false;
        };
        let mut port_ids = rent_vec::<PortId>();
        port_ids.extend(entry.port_ids());

        for port in port_ids.iter() {
            self.disconnect_all(*port);
        }
        for port in port_ids.iter() {
            self.ports.remove(port);
        }
        self.nodes.shift_remove(&id);
        log::debug!("Removed node {}", id);
        true
    }

    pub fn node(&self, id: NodeId) -> Option<NodeView<'_>> {
        self.nodes.get(&id).map(NodeView::new)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = NodeView<'_>> {
        self.nodes.values().map(NodeView::new)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes whose type marks them as execution entry points
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|entry| entry.metadata.entry)
            .map(|entry| entry.id)
            .collect()
    }

    // ---- ports ----

    pub fn port(&self, id: impl Into<PortId>) -> Option<PortView<'_>> {
        self.ports.get(&id.into()).map(PortView::new)
    }

    /// Find a node's port by kind and name
    pub fn find_port(&self, node: NodeId, kind: PortKind, name: &str) -> Option<PortId> {
        let entry = self.nodes.get(&node)?;
        let ids = match kind {
            PortKind::Input => &entry.inputs,
            PortKind::Output => &entry.outputs,
            PortKind::ExecIn => &entry.exec_inputs,
            PortKind::ExecOut => &entry.exec_outputs,
        };
        ids.iter()
            .copied()
            .find(|id| self.ports.get(id).is_some_and(|slot| slot.name == name))
    }

    // ---- connections ----

    /// Whether both ports accept a connection to each other
    pub fn can_connect(&self, a: impl Into<PortId>, b: impl Into<PortId>) -> bool {
        let (a, b) = (a.into(), b.into());
        match (self.ports.get(&a), self.ports.get(&b)) {
            (Some(pa), Some(pb)) => pa.accepts(pb, &self.resolver) && pb.accepts(pa, &self.resolver),
            _ => false,
        }
    }

    /// Connect two ports in either order
    ///
    /// Returns `false` and changes nothing when either side refuses. A
    /// single-connect endpoint that is already occupied is rewired: its old
    /// link is removed from both sides first. Connecting an already
    /// connected pair succeeds without adding a second link.
    pub fn connect(&mut self, a: impl Into<PortId>, b: impl Into<PortId>) -> bool {
        let (a, b) = (a.into(), b.into());
        let (Some(pa), Some(pb)) = (self.ports.get(&a), self.ports.get(&b)) else {
            return false;
        };
        if !(pa.accepts(pb, &self.resolver) && pb.accepts(pa, &self.resolver)) {
            log::debug!("Rejected connection {} <-> {}", a, b);
            return false;
        }
        if pa.is_linked_to(b) {
            return true;
        }

        let (source, target) = if pa.kind.is_source() { (a, b) } else { (b, a) };
        let conversion: Option<Conversion> = if pa.kind.is_exec() {
            None
        } else {
            pa.conversion_with(pb, &self.resolver)
        };

        for end in [source, target] {
            let occupied = self
                .ports
                .get(&end)
                .is_some_and(|slot| slot.kind.cardinality() == Cardinality::Single && !slot.links.is_empty());
            if occupied {
                self.disconnect_all(end);
            }
        }

        if let Some(slot) = self.ports.get_mut(&source) {
            slot.links.push(Link {
                peer: target,
                conversion: conversion.clone(),
            });
        }
        if let Some(slot) = self.ports.get_mut(&target) {
            slot.links.push(Link {
                peer: source,
                conversion,
            });
        }
        log::debug!("Connected {} -> {}", source, target);
        true
    }

    /// Remove the connection between two ports
    ///
    /// Returns whether a connection existed. Disconnecting an absent link is
    /// a no-op.
    pub fn disconnect(&mut self, a: impl Into<PortId>, b: impl Into<PortId>) -> bool {
        let (a, b) = (a.into(), b.into());
        let removed_a = self.ports.get_mut(&a).is_some_and(|slot| slot.unlink(b));
        let removed_b = self.ports.get_mut(&b).is_some_and(|slot| slot.unlink(a));
        if removed_a || removed_b {
            log::debug!("Disconnected {} <-> {}", a, b);
        }
        removed_a || removed_b
    }

    /// Remove every connection of a port, returning how many were removed
    pub fn disconnect_all(&mut self, port: impl Into<PortId>) -> usize {
        let port = port.into();
        let Some(slot) = self.ports.get_mut(&port) else {
            return 0;
        };
        let links = std::mem::take(&mut slot.links);
        for link in &links {
            if let Some(peer) = self.ports.get_mut(&link.peer) {
                peer.unlink(port);
            }
        }
        links.len()
    }

    /// All connections
    ///
    /// Data connections are listed per output in fan-out order, exec
    /// connections per exec input in fan-in order, so replaying the list
    /// reproduces every multi-connect ordering.
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = Vec::new();
        for entry in self.nodes.values() {
            for port in &entry.outputs {
                if let Some(slot) = self.ports.get(port) {
                    connections.extend(slot.links.iter().map(|link| Connection {
                        source: *port,
                        target: link.peer,
                    }));
                }
            }
        }
        for entry in self.nodes.values() {
            for port in &entry.exec_inputs {
                if let Some(slot) = self.ports.get(port) {
                    connections.extend(slot.links.iter().map(|link| Connection {
                        source: link.peer,
                        target: *port,
                    }));
                }
            }
        }
        connections
    }

    // ---- values ----

    /// Write a value into an input port
    pub fn set_input_value<T: DataType>(&mut self, port: InputPort<T>, value: T) -> Result<()> {
        let slot = self
            .ports
            .get_mut(&port.id())
            .ok_or(EngineError::UnknownPort(port.id()))?;
        slot.value = Some(Box::new(value));
        Ok(())
    }

    pub fn input_value<T: DataType>(&self, port: InputPort<T>) -> Option<T> {
        self.typed_value(port.id())
    }

    /// Last value pushed through an output port
    pub fn output_value<T: DataType>(&self, port: OutputPort<T>) -> Option<T> {
        self.typed_value(port.id())
    }

    /// Push a value through an output port into every connected input
    pub fn set_output_value<T: DataType>(&mut self, port: OutputPort<T>, value: T) -> Result<()> {
        self.push_output(port.id(), Box::new(value))
    }

    /// Human-readable value of any port
    pub fn port_value_string(&self, port: impl Into<PortId>) -> Option<String> {
        self.ports.get(&port.into()).map(PortSlot::value_string)
    }

    fn typed_value<T: DataType>(&self, port: PortId) -> Option<T> {
        self.ports
            .get(&port)?
            .value
            .as_ref()?
            .downcast_ref::<T>()
            .cloned()
    }

    pub(crate) fn push_output(&mut self, port: PortId, value: BoxValue) -> Result<()> {
        let slot = self.ports.get(&port).ok_or(EngineError::UnknownPort(port))?;
        if slot.kind != PortKind::Output {
            return Err(EngineError::failed(format!("port '{}' is not an output", slot.name)));
        }
        if slot.value_type != Some(value.value_type()) {
            let expected = slot.value_type.map(|t| t.name()).unwrap_or("exec");
            return Err(EngineError::type_mismatch(slot.name.clone(), expected));
        }

        let mut targets = rent_vec::<(PortId, Option<Conversion>)>();
        targets.extend(slot.links.iter().map(|link| (link.peer, link.conversion.clone())));

        for (peer, conversion) in targets.drain(..) {
            let converted = match conversion {
                Some(conversion) => conversion.apply(&*value),
                None => Some(value.clone_value()),
            };
            match (converted, self.ports.get_mut(&peer)) {
                (Some(converted), Some(sink)) => sink.value = Some(converted),
                (None, _) => log::warn!(
                    "Conversion from {} rejected value on link {} -> {}",
                    value.value_type(),
                    port,
                    peer
                ),
                (Some(_), None) => {}
            }
        }

        if let Some(slot) = self.ports.get_mut(&port) {
            slot.value = Some(value);
        }
        Ok(())
    }

    // ---- properties ----

    pub fn set_property<T: DataType>(&mut self, node: NodeId, property: Property<T>, value: T) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(&node)
            .ok_or(EngineError::UnknownNode(node))?
            .properties
            .get_mut(property.index())
            .ok_or_else(|| EngineError::failed(format!("node {} has no property #{}", node, property.index())))?;
        if !slot.value_type.is::<T>() {
            return Err(EngineError::type_mismatch(slot.name.clone(), slot.value_type.name()));
        }
        slot.value = Box::new(value);
        Ok(())
    }

    pub fn property<T: DataType>(&self, node: NodeId, property: Property<T>) -> Result<T> {
        let slot = self
            .nodes
            .get(&node)
            .ok_or(EngineError::UnknownNode(node))?
            .properties
            .get(property.index())
            .ok_or_else(|| EngineError::failed(format!("node {} has no property #{}", node, property.index())))?;
        slot.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| EngineError::type_mismatch(slot.name.clone(), std::any::type_name::<T>()))
    }

    /// Set a property by name from its JSON form
    pub fn set_property_json(&mut self, node: NodeId, name: &str, value: serde_json::Value) -> Result<()> {
        let entry = self.nodes.get_mut(&node).ok_or(EngineError::UnknownNode(node))?;
        let index = entry
            .property_index(name)
            .ok_or_else(|| EngineError::UnknownProperty {
                node,
                name: name.to_string(),
            })?;
        let slot = &mut entry.properties[index];
        slot.value = slot.value_type.decode(value)?;
        Ok(())
    }

    /// JSON form of a property
    pub fn property_json(&self, node: NodeId, name: &str) -> Result<serde_json::Value> {
        let entry = self.nodes.get(&node).ok_or(EngineError::UnknownNode(node))?;
        let slot = entry
            .property_index(name)
            .map(|index| &entry.properties[index])
            .ok_or_else(|| EngineError::UnknownProperty {
                node,
                name: name.to_string(),
            })?;
        Ok(slot.value.to_json()?)
    }

    // ---- execution support ----

    /// Node reached by following an exec output's link
    pub(crate) fn exec_target(&self, exec_out: PortId) -> Option<NodeId> {
        let slot = self.ports.get(&exec_out)?;
        let link = slot.links.first()?;
        self.ports.get(&link.peer).map(|target| target.node)
    }

    /// Distinct nodes feeding a node's data inputs, in input order
    pub(crate) fn upstream_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut upstream = Vec::new();
        let Some(entry) = self.nodes.get(&node) else {
            return upstream;
        };
        for input in &entry.inputs {
            let Some(slot) = self.ports.get(input) else { continue };
            for link in &slot.links {
                if let Some(source) = self.ports.get(&link.peer) {
                    if !upstream.contains(&source.node) {
                        upstream.push(source.node);
                    }
                }
            }
        }
        upstream
    }

    /// Create an executor for this graph
    ///
    /// The executor borrows the graph mutably, so the graph cannot be edited
    /// while a run is in progress.
    pub fn create_executor(&mut self) -> GraphExecutor<'_> {
        GraphExecutor::new(self)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AddNode, ConstNode, SinkNode, StartNode, WideNode};

    #[test]
    fn test_add_and_find_nodes() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let add = graph.add_node::<AddNode>();

        assert_eq!(graph.node_count(), 2);
        let order: Vec<NodeId> = graph.nodes().map(|n| n.id()).collect();
        assert_eq!(order, vec![start.id(), add.id()]);
        assert_eq!(graph.entry_nodes(), vec![start.id()]);

        let view = graph.node(add.id()).unwrap();
        assert_eq!(view.node_type(), "test-add");
        assert!(view.is_pure());
        assert_eq!(
            graph.find_port(add.id(), PortKind::Input, "b"),
            Some(add.b.id())
        );
        assert_eq!(graph.find_port(add.id(), PortKind::Output, "b"), None);
    }

    #[test]
    fn test_add_node_of_unknown_type() {
        let mut graph = Graph::new();
        let registry = NodeRegistry::new();
        assert!(matches!(
            graph.add_node_of_type(&registry, "missing"),
            Err(EngineError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_single_connect_rewires() {
        let mut graph = Graph::new();
        let first = graph.add_node::<ConstNode>();
        let second = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();

        assert!(graph.connect(first.value, add.a));
        assert!(graph.connect(second.value, add.a));

        let sink = graph.port(add.a).unwrap();
        assert_eq!(sink.connected_ports(), vec![second.value.id()]);
        assert!(!graph.port(first.value).unwrap().is_connected());
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_multi_connect_keeps_order() {
        let mut graph = Graph::new();
        let source = graph.add_node::<ConstNode>();
        let add1 = graph.add_node::<AddNode>();
        let add2 = graph.add_node::<AddNode>();

        assert!(graph.connect(source.value, add1.a));
        assert!(graph.connect(add2.b, source.value));

        let out = graph.port(source.value).unwrap();
        assert_eq!(out.connected_ports(), vec![add1.a.id(), add2.b.id()]);
    }

    #[test]
    fn test_exec_in_merges_and_exec_out_rewires() {
        let mut graph = Graph::new();
        let start1 = graph.add_node::<StartNode>();
        let start2 = graph.add_node::<StartNode>();
        let sink1 = graph.add_node::<SinkNode>();
        let sink2 = graph.add_node::<SinkNode>();

        assert!(graph.connect(start1.then, sink1.exec));
        assert!(graph.connect(start2.then, sink1.exec));
        assert_eq!(
            graph.port(sink1.exec).unwrap().connected_ports(),
            vec![start1.then.id(), start2.then.id()]
        );

        assert!(graph.connect(start1.then, sink2.exec));
        assert_eq!(
            graph.port(start1.then).unwrap().connected_ports(),
            vec![sink2.exec.id()]
        );
        assert_eq!(
            graph.port(sink1.exec).unwrap().connected_ports(),
            vec![start2.then.id()]
        );
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut graph = Graph::new();
        let source = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();

        assert!(graph.connect(source.value, add.a));
        assert!(graph.connect(add.a, source.value));
        assert_eq!(graph.port(source.value).unwrap().connected_ports().len(), 1);
    }

    #[test]
    fn test_rejected_connection_changes_nothing() {
        let mut graph = Graph::new();
        let wide = graph.add_node::<WideNode>();
        let narrow_source = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();

        assert!(graph.connect(narrow_source.value, add.a));
        // i32 -> i8 is narrowing
        assert!(!graph.can_connect(add.sum, wide.small));
        assert!(!graph.connect(add.sum, wide.small));
        // self-loop on data ports
        assert!(!graph.connect(add.sum, add.b));
        // kind mismatch
        assert!(!graph.connect(narrow_source.value, add.sum));

        assert_eq!(graph.connections().len(), 1);
        assert!(!graph.port(wide.small).unwrap().is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut graph = Graph::new();
        let source = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();
        graph.connect(source.value, add.a);

        assert!(graph.disconnect(add.a, source.value));
        assert!(!graph.disconnect(add.a, source.value));
        assert_eq!(graph.disconnect_all(add.a), 0);
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_remove_node_clears_neighbors() {
        let mut graph = Graph::new();
        let a = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();
        let b = graph.add_node::<ConstNode>();
        let downstream = graph.add_node::<AddNode>();

        graph.connect(a.value, add.a);
        graph.connect(add.sum, downstream.a);
        graph.connect(b.value, downstream.b);

        assert!(graph.remove_node(add.id()));
        assert!(!graph.remove_node(add.id()));

        assert!(graph.port(a.value).unwrap().connected_ports().is_empty());
        assert!(graph.port(downstream.a).unwrap().connected_ports().is_empty());
        assert!(graph.port(add.sum).is_none());
        assert_eq!(graph.connections().len(), 1);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_output_pushes_through_conversion() {
        let mut graph = Graph::new();
        let wide = graph.add_node::<WideNode>();
        let add = graph.add_node::<AddNode>();

        assert!(graph.connect(wide.narrow, add.a));
        graph.set_output_value(wide.narrow, -100_i8).unwrap();

        assert_eq!(graph.input_value(add.a), Some(-100_i32));
        assert_eq!(graph.output_value(wide.narrow), Some(-100_i8));
        assert_eq!(graph.port_value_string(add.a).as_deref(), Some("-100"));
    }

    #[test]
    fn test_properties() {
        let mut graph = Graph::new();
        let constant = graph.add_node::<ConstNode>();

        assert_eq!(graph.property(constant.id(), constant.amount).unwrap(), 0);
        graph.set_property(constant.id(), constant.amount, 7).unwrap();
        assert_eq!(graph.property_json(constant.id(), "amount").unwrap(), serde_json::json!(7));

        graph
            .set_property_json(constant.id(), "amount", serde_json::json!(11))
            .unwrap();
        assert_eq!(graph.property(constant.id(), constant.amount).unwrap(), 11);

        assert!(matches!(
            graph.set_property_json(constant.id(), "missing", serde_json::json!(1)),
            Err(EngineError::UnknownProperty { .. })
        ));
        assert!(matches!(
            graph.set_property_json(constant.id(), "amount", serde_json::json!("x")),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_custom_resolver_per_graph() {
        let resolver = Arc::new(ConversionResolver::new());
        resolver.register::<i32, i8>(|v| (*v).clamp(i8::MIN as i32, i8::MAX as i32) as i8);

        let mut graph = Graph::with_resolver(resolver);
        let add = graph.add_node::<AddNode>();
        let wide = graph.add_node::<WideNode>();
        assert!(graph.connect(add.sum, wide.small));

        graph.set_output_value(add.sum, 1000).unwrap();
        assert_eq!(graph.input_value(wide.small), Some(127_i8));
    }
}
