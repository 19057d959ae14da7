//! Start Node
//!
//! Entry point of a graph. Every start node fires once per execution, in
//! graph order.

use async_trait::async_trait;
use portflow_engine::{ExecOutPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, Result};

/// Start Node
///
/// # Exec outputs
/// - `then` - fired when execution begins
pub struct StartNode {
    pub then: ExecOutPort,
}

impl NodeType for StartNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "start".to_string(),
            category: NodeCategory::Event,
            label: "Start".to_string(),
            description: "Begins execution".to_string(),
            entry: true,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            then: builder.exec_out("then"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<StartNode>());

#[async_trait]
impl Node for StartNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        log::debug!("StartNode {}: firing", ctx.node_id());
        ctx.trigger(self.then);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, Journal};
    use portflow_engine::Graph;

    #[tokio::test]
    async fn test_every_start_node_fires() {
        let mut graph = Graph::new();
        graph.add_node::<StartNode>();
        graph.add_node::<StartNode>();

        let journal = Journal::default();
        let outcome = run(&mut graph, &journal).await;
        assert!(outcome.is_completed());
        assert_eq!(journal.completed("start"), 2);
    }
}
