//! Node type registry
//!
//! Maps node type strings to metadata and a constructor. Graphs use it to
//! create nodes by name and to restore snapshots.
//!
//! Node crates submit a [`NodeRegistration`] for each type with
//! `inventory::submit!`, and [`NodeRegistry::with_builtins`] collects every
//! submission linked into the program:
//!
//! ```ignore
//! inventory::submit!(portflow_engine::NodeRegistration::of::<StartNode>());
//!
//! let registry = NodeRegistry::with_builtins();
//! assert!(registry.has_node_type("start"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::{Node, NodeBuilder, NodeCategory, NodeMetadata, NodeType};

/// Builds a node, declaring its ports on the builder
pub type NodeConstructor = fn(&mut NodeBuilder) -> Arc<dyn Node>;

/// Link-time registration of a node type
pub struct NodeRegistration {
    pub metadata: fn() -> NodeMetadata,
    pub construct: NodeConstructor,
}

impl NodeRegistration {
    pub const fn of<N: NodeType>() -> Self {
        Self {
            metadata: N::metadata,
            construct: construct::<N>,
        }
    }
}

inventory::collect!(NodeRegistration);

fn construct<N: NodeType>(builder: &mut NodeBuilder) -> Arc<dyn Node> {
    Arc::new(N::create(builder))
}

struct RegistryEntry {
    metadata: NodeMetadata,
    construct: NodeConstructor,
}

/// Registry of node types
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding every node type submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<NodeRegistration> {
            registry.register_raw((registration.metadata)(), registration.construct);
        }
        log::debug!("Collected {} built-in node types", registry.entries.len());
        registry
    }

    /// Register a node type
    pub fn register<N: NodeType>(&mut self) {
        self.register_raw(N::metadata(), construct::<N>);
    }

    /// Register metadata with an explicit constructor
    ///
    /// Replaces an existing entry with the same node type.
    pub fn register_raw(&mut self, metadata: NodeMetadata, construct: NodeConstructor) {
        self.entries.insert(
            metadata.node_type.clone(),
            RegistryEntry {
                metadata,
                construct,
            },
        );
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<&NodeMetadata> {
        self.entries.get(node_type).map(|e| &e.metadata)
    }

    pub(crate) fn constructor(&self, node_type: &str) -> Option<(&NodeMetadata, NodeConstructor)> {
        self.entries
            .get(node_type)
            .map(|e| (&e.metadata, e.construct))
    }

    /// Get all registered metadata, sorted by node type
    pub fn all_metadata(&self) -> Vec<&NodeMetadata> {
        let mut all: Vec<&NodeMetadata> = self.entries.values().map(|e| &e.metadata).collect();
        all.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        all
    }

    /// Get metadata grouped by category
    pub fn metadata_by_category(&self) -> HashMap<NodeCategory, Vec<&NodeMetadata>> {
        let mut grouped: HashMap<NodeCategory, Vec<&NodeMetadata>> = HashMap::new();
        for metadata in self.all_metadata() {
            grouped.entry(metadata.category).or_default().push(metadata);
        }
        grouped
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
