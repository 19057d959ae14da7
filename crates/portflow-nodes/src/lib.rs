//! Portflow Nodes
//!
//! Built-in node implementations for the Portflow engine. Every node type
//! and initializer here registers itself through `inventory`, so
//! [`NodeRegistry::with_builtins`](portflow_engine::NodeRegistry::with_builtins)
//! and the executor's initializer discovery pick them up once this crate is
//! linked.
//!
//! # Categories
//!
//! - **Control**: start, branch, sequence, for-loop, delay
//! - **Data**: constants and random numbers
//! - **Math**: arithmetic and comparison
//! - **Chat**: chat histories and completion through a host service
//! - **Debug**: printing values

pub mod chat;
pub mod control;
pub mod data;
pub mod debug;
pub mod math;

// Re-export all nodes for convenience
pub use chat::*;
pub use control::*;
pub use data::*;
pub use debug::*;
pub use math::*;

#[cfg(test)]
mod tests {
    use portflow_engine::{NodeCategory, NodeRegistry};

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = NodeRegistry::with_builtins();
        assert_eq!(registry.all_metadata().len(), 18, "Expected 18 built-in nodes");

        // Spot-check known types
        assert!(registry.has_node_type("start"));
        assert!(registry.has_node_type("for-loop"));
        assert!(registry.has_node_type("constant-string"));
        assert!(registry.has_node_type("greater-than"));
        assert!(registry.has_node_type("add-message"));
        assert!(registry.has_node_type("chat-completion"));
        assert!(registry.has_node_type("print"));

        let entries: Vec<&str> = registry
            .all_metadata()
            .into_iter()
            .filter(|m| m.entry)
            .map(|m| m.node_type.as_str())
            .collect();
        assert_eq!(entries, vec!["start"]);
        assert_eq!(registry.metadata_by_category()[&NodeCategory::Chat].len(), 3);
    }
}

/// Shared helpers for node tests
#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use portflow_engine::{EngineError, ExecutionObserver, ExecutionOutcome, Graph, NodeId, NodeInfo};
    use tokio_util::sync::CancellationToken;

    enum Entry {
        Started(NodeInfo),
        Completed(NodeInfo),
        Failed(NodeInfo, String),
    }

    /// Observer remembering every node callback in order
    #[derive(Default)]
    pub struct Journal {
        entries: Mutex<Vec<Entry>>,
    }

    impl Journal {
        pub fn started_ids(&self, node_type: &str) -> Vec<NodeId> {
            self.entries
                .lock()
                .iter()
                .filter_map(|e| match e {
                    Entry::Started(info) if info.node_type == node_type => Some(info.id),
                    _ => None,
                })
                .collect()
        }

        pub fn completed(&self, node_type: &str) -> usize {
            self.entries
                .lock()
                .iter()
                .filter(|e| matches!(e, Entry::Completed(info) if info.node_type == node_type))
                .count()
        }

        pub fn errors(&self, node_type: &str) -> Vec<String> {
            self.entries
                .lock()
                .iter()
                .filter_map(|e| match e {
                    Entry::Failed(info, error) if info.node_type == node_type => Some(error.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl ExecutionObserver for Journal {
        fn on_node_start(&self, node: &NodeInfo) {
            self.entries.lock().push(Entry::Started(node.clone()));
        }

        fn on_node_complete(&self, node: &NodeInfo) {
            self.entries.lock().push(Entry::Completed(node.clone()));
        }

        fn on_node_error(&self, node: &NodeInfo, error: &EngineError) {
            self.entries.lock().push(Entry::Failed(node.clone(), error.to_string()));
        }
    }

    /// Execute `graph` to the end with a fresh token
    pub async fn run(graph: &mut Graph, journal: &Journal) -> ExecutionOutcome {
        graph
            .create_executor()
            .execute(journal, CancellationToken::new())
            .await
    }
}
