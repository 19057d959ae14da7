//! Print Node
//!
//! Logs any value at `info` level and passes its text on.

use async_trait::async_trait;
use portflow_engine::{
    AnyValue, DataType, ExecInPort, ExecOutPort, InputPort, Node, NodeBuilder, NodeCategory, NodeContext,
    NodeMetadata, NodeType, OutputPort, Result,
};

/// Print Node
///
/// # Inputs
/// - `value` - anything, every port type connects to it
///
/// # Outputs
/// - `text` - the printed text, empty when `value` holds nothing
pub struct PrintNode {
    pub exec: ExecInPort,
    pub then: ExecOutPort,
    pub value: InputPort<AnyValue>,
    pub text: OutputPort<String>,
}

impl NodeType for PrintNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "print".to_string(),
            category: NodeCategory::Debug,
            label: "Print".to_string(),
            description: "Logs a value".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            then: builder.exec_out("then"),
            value: builder.input("value"),
            text: builder.output("text"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<PrintNode>());

#[async_trait]
impl Node for PrintNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let text = ctx
            .try_get(self.value)
            .map(|value| value.display())
            .unwrap_or_default();
        log::info!("[print {}] {}", ctx.node_id(), text);

        ctx.set(self.text, text)?;
        ctx.trigger(self.then);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartNode;
    use crate::data::StringConstant;
    use crate::testing::{run, Journal};
    use portflow_engine::Graph;

    #[tokio::test]
    async fn test_prints_connected_value() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let constant = graph.add_node::<StringConstant>();
        let print = graph.add_node::<PrintNode>();

        graph
            .set_property(constant.id(), constant.value, "hello".to_string())
            .unwrap();
        assert!(graph.connect(constant.output, print.value));
        graph.connect(start.then, print.exec);

        run(&mut graph, &Journal::default()).await;
        assert_eq!(graph.output_value(print.text), Some("hello".to_string()));
        assert_eq!(graph.port_value_string(print.value).as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_prints_empty_without_value() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let print = graph.add_node::<PrintNode>();
        graph.connect(start.then, print.exec);

        run(&mut graph, &Journal::default()).await;
        assert_eq!(graph.output_value(print.text), Some(String::new()));
    }
}
