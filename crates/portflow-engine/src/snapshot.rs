//! Serializable graph snapshots
//!
//! A snapshot records what is needed to rebuild a graph: node types and
//! ids, port ids per kind in declaration order, property values, values of
//! unconnected inputs, and the connection list. Port layouts are not stored
//! beyond their ids; restoring re-runs each node type's construction and
//! fails if the saved ids do not line up with what the type declares.
//!
//! ```json
//! {
//!   "nodes": [
//!     {
//!       "id": "…", "nodeType": "constant-i32",
//!       "properties": [{ "name": "value", "value": 3 }],
//!       "inputs": [], "outputs": ["…"], "execInputs": [], "execOutputs": []
//!     }
//!   ],
//!   "connections": [{ "source": "…", "target": "…" }]
//! }
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversion::{self, ConversionResolver};
use crate::error::{EngineError, Result};
use crate::graph::{Connection, Graph};
use crate::ids::{NodeId, PortId};
use crate::node::{NodeBuilder, SavedLayout};
use crate::registry::NodeRegistry;

/// Serialized form of a whole graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Serialized form of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub properties: Vec<PropertySnapshot>,
    #[serde(default)]
    pub inputs: Vec<InputSnapshot>,
    #[serde(default)]
    pub outputs: Vec<PortId>,
    #[serde(default)]
    pub exec_inputs: Vec<PortId>,
    #[serde(default)]
    pub exec_outputs: Vec<PortId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub name: String,
    pub value: Value,
}

/// An input port and, when it is unconnected, its stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub id: PortId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

impl Graph {
    /// Capture the graph's structure and stored values
    pub fn snapshot(&self) -> Result<GraphSnapshot> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for entry in self.nodes.values() {
            let mut properties = Vec::with_capacity(entry.properties.len());
            for slot in &entry.properties {
                properties.push(PropertySnapshot {
                    name: slot.name.clone(),
                    value: slot.value.to_json()?,
                });
            }

            let mut inputs = Vec::with_capacity(entry.inputs.len());
            for id in &entry.inputs {
                let slot = self.ports.get(id).ok_or(EngineError::UnknownPort(*id))?;
                let value = match (&slot.value, slot.links.is_empty()) {
                    (Some(value), true) => Some(value.to_json()?),
                    _ => None,
                };
                inputs.push(InputSnapshot {
                    id: *id,
                    name: slot.name.clone(),
                    value,
                });
            }

            nodes.push(NodeSnapshot {
                id: entry.id,
                node_type: entry.metadata.node_type.clone(),
                properties,
                inputs,
                outputs: entry.outputs.clone(),
                exec_inputs: entry.exec_inputs.clone(),
                exec_outputs: entry.exec_outputs.clone(),
            });
        }

        Ok(GraphSnapshot {
            nodes,
            connections: self.connections(),
        })
    }

    /// Rebuild a graph, resolving node types through `registry`
    pub fn from_snapshot(snapshot: &GraphSnapshot, registry: &NodeRegistry) -> Result<Self> {
        Self::from_snapshot_with_resolver(snapshot, registry, conversion::global())
    }

    pub fn from_snapshot_with_resolver(
        snapshot: &GraphSnapshot,
        registry: &NodeRegistry,
        resolver: Arc<ConversionResolver>,
    ) -> Result<Self> {
        let mut graph = Graph::with_resolver(resolver);

        for node in &snapshot.nodes {
            let saved = SavedLayout {
                inputs: node.inputs.iter().map(|input| input.id).collect(),
                outputs: VecDeque::from(node.outputs.clone()),
                exec_inputs: VecDeque::from(node.exec_inputs.clone()),
                exec_outputs: VecDeque::from(node.exec_outputs.clone()),
            };
            graph.add_registered(registry, &node.node_type, NodeBuilder::restoring(node.id, saved))?;

            for property in &node.properties {
                graph.set_property_json(node.id, &property.name, property.value.clone())?;
            }
            for input in &node.inputs {
                let Some(value) = &input.value else { continue };
                let slot = graph
                    .ports
                    .get_mut(&input.id)
                    .ok_or(EngineError::UnknownPort(input.id))?;
                let decoded = slot
                    .value_type
                    .ok_or_else(|| EngineError::InvalidSnapshot(format!("input {} has no value type", input.id)))?
                    .decode(value.clone())?;
                slot.value = Some(decoded);
            }
        }

        for connection in &snapshot.connections {
            if !graph.connect(connection.source, connection.target) {
                return Err(EngineError::InvalidSnapshot(format!(
                    "connection {} -> {} is not allowed",
                    connection.source, connection.target
                )));
            }
        }

        log::debug!(
            "Restored graph with {} node(s) and {} connection(s)",
            graph.node_count(),
            snapshot.connections.len()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_registry, AddNode, ConstNode, RecordNode, StartNode, WideNode};

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let constant = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();
        let record = graph.add_node::<RecordNode>();
        let wide = graph.add_node::<WideNode>();

        graph.set_property(constant.id(), constant.amount, 9).unwrap();
        graph.set_input_value(add.b, 4).unwrap();
        graph.set_input_value(wide.small, 3_i8).unwrap();
        graph.connect(constant.value, add.a);
        graph.connect(add.sum, record.value);
        graph.connect(wide.narrow, record.value);
        graph.connect(start.then, record.exec);
        graph
    }

    #[test]
    fn test_snapshot_round_trip() {
        let graph = sample_graph();
        let snapshot = graph.snapshot().unwrap();

        let json = snapshot.to_json().unwrap();
        let parsed = GraphSnapshot::from_json(&json).unwrap();
        let restored = Graph::from_snapshot(&parsed, &test_registry()).unwrap();

        assert_eq!(restored.snapshot().unwrap(), snapshot);
        assert_eq!(restored.connections(), graph.connections());
        let order: Vec<NodeId> = restored.nodes().map(|n| n.id()).collect();
        let original: Vec<NodeId> = graph.nodes().map(|n| n.id()).collect();
        assert_eq!(order, original);
    }

    #[test]
    fn test_connected_inputs_store_no_value() {
        let mut graph = Graph::new();
        let constant = graph.add_node::<ConstNode>();
        let add = graph.add_node::<AddNode>();
        graph.set_input_value(add.a, 1).unwrap();
        graph.set_input_value(add.b, 2).unwrap();
        graph.connect(constant.value, add.a);

        let snapshot = graph.snapshot().unwrap();
        let node = snapshot.nodes.iter().find(|n| n.id == add.id()).unwrap();
        assert_eq!(node.inputs[0].value, None);
        assert_eq!(node.inputs[1].value, Some(serde_json::json!(2)));
    }

    #[test]
    fn test_restored_values() {
        let graph = sample_graph();
        let snapshot = graph.snapshot().unwrap();
        let restored = Graph::from_snapshot(&snapshot, &test_registry()).unwrap();

        let add = restored.nodes().find(|n| n.node_type() == "test-add").unwrap();
        let b = restored.find_port(add.id(), crate::port::PortKind::Input, "b").unwrap();
        assert_eq!(restored.port_value_string(b).as_deref(), Some("4"));

        let constant = restored.nodes().find(|n| n.node_type() == "test-const").unwrap();
        assert_eq!(
            restored.property_json(constant.id(), "amount").unwrap(),
            serde_json::json!(9)
        );
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let mut snapshot = sample_graph().snapshot().unwrap();
        snapshot.nodes[0].node_type = "missing".to_string();
        assert!(matches!(
            Graph::from_snapshot(&snapshot, &test_registry()),
            Err(EngineError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_mismatched_layout_rejected() {
        let mut snapshot = sample_graph().snapshot().unwrap();
        let add = snapshot
            .nodes
            .iter_mut()
            .find(|n| n.node_type == "test-add")
            .unwrap();
        add.outputs.push(PortId::new());
        assert!(matches!(
            Graph::from_snapshot(&snapshot, &test_registry()),
            Err(EngineError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_repeated_port_id_in_node_rejected() {
        let mut snapshot = sample_graph().snapshot().unwrap();
        let add = snapshot
            .nodes
            .iter_mut()
            .find(|n| n.node_type == "test-add")
            .unwrap();
        add.inputs[1].id = add.inputs[0].id;
        assert!(matches!(
            Graph::from_snapshot(&snapshot, &test_registry()),
            Err(EngineError::InvalidSnapshot(_))
        ));

        let mut snapshot = sample_graph().snapshot().unwrap();
        let record = snapshot
            .nodes
            .iter_mut()
            .find(|n| n.node_type == "test-record")
            .unwrap();
        record.outputs[0] = record.exec_inputs[0];
        assert!(matches!(
            Graph::from_snapshot(&snapshot, &test_registry()),
            Err(EngineError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_illegal_connection_rejected() {
        let mut snapshot = sample_graph().snapshot().unwrap();
        let first = snapshot.connections[0];
        snapshot.connections.push(Connection {
            source: first.target,
            target: first.target,
        });
        assert!(matches!(
            Graph::from_snapshot(&snapshot, &test_registry()),
            Err(EngineError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let snapshot = sample_graph().snapshot().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        snapshot.save(&path).unwrap();
        assert_eq!(GraphSnapshot::load(&path).unwrap(), snapshot);
    }
}
