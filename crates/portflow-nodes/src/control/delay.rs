//! Delay Node
//!
//! Waits before continuing. The wait ends early with `Cancelled` when the
//! execution is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use portflow_engine::{
    EngineError, ExecInPort, ExecOutPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType,
    Property, Result,
};

pub struct DelayNode {
    pub exec: ExecInPort,
    pub then: ExecOutPort,
    /// Wait time in milliseconds
    pub millis: Property<u64>,
}

impl NodeType for DelayNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "delay".to_string(),
            category: NodeCategory::Control,
            label: "Delay".to_string(),
            description: "Waits for a fixed time before continuing".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            then: builder.exec_out("then"),
            millis: builder.property("millis", 1000),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<DelayNode>());

#[async_trait]
impl Node for DelayNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let millis = ctx.property(self.millis)?;
        let cancel = ctx.cancellation_token().clone();

        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
        }

        ctx.trigger(self.then);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartNode;
    use crate::testing::{run, Journal};
    use portflow_engine::Graph;
    use std::time::Instant;

    #[tokio::test]
    async fn test_waits_then_continues() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let first = graph.add_node::<DelayNode>();
        let second = graph.add_node::<DelayNode>();
        graph.set_property(first.id(), first.millis, 20).unwrap();
        graph.set_property(second.id(), second.millis, 0).unwrap();
        graph.connect(start.then, first.exec);
        graph.connect(first.then, second.exec);

        let journal = Journal::default();
        let begin = Instant::now();
        let outcome = run(&mut graph, &journal).await;

        assert!(outcome.is_completed());
        assert!(begin.elapsed() >= Duration::from_millis(20));
        assert_eq!(journal.completed("delay"), 2);
    }
}
