//! Branch Node
//!
//! Routes control flow on a boolean condition.

use async_trait::async_trait;
use portflow_engine::{
    ExecInPort, ExecOutPort, InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, Result,
};

/// Branch Node
///
/// # Inputs
/// - `condition` (default `false`)
///
/// # Exec outputs
/// - `true` - fired when the condition holds
/// - `false` - fired otherwise
pub struct BranchNode {
    pub exec: ExecInPort,
    pub condition: InputPort<bool>,
    pub on_true: ExecOutPort,
    pub on_false: ExecOutPort,
}

impl NodeType for BranchNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "branch".to_string(),
            category: NodeCategory::Control,
            label: "Branch".to_string(),
            description: "Continues on one of two paths depending on a condition".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            condition: builder.input_with_default("condition", false),
            on_true: builder.exec_out("true"),
            on_false: builder.exec_out("false"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<BranchNode>());

#[async_trait]
impl Node for BranchNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let condition = ctx.get(self.condition)?;
        log::debug!("BranchNode {}: condition={}", ctx.node_id(), condition);

        if condition {
            ctx.trigger(self.on_true);
        } else {
            ctx.trigger(self.on_false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartNode;
    use crate::data::BoolConstant;
    use crate::debug::PrintNode;
    use crate::testing::{run, Journal};
    use portflow_engine::Graph;

    async fn take_branch(condition: bool) -> (Journal, String) {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let constant = graph.add_node::<BoolConstant>();
        let branch = graph.add_node::<BranchNode>();
        let yes = graph.add_node::<PrintNode>();
        let no = graph.add_node::<PrintNode>();

        graph.set_property(constant.id(), constant.value, condition).unwrap();
        graph.connect(constant.output, branch.condition);
        graph.connect(start.then, branch.exec);
        graph.connect(branch.on_true, yes.exec);
        graph.connect(branch.on_false, no.exec);
        graph.set_input_value(yes.value, portflow_engine::AnyValue::new("yes".to_string())).unwrap();
        graph.set_input_value(no.value, portflow_engine::AnyValue::new("no".to_string())).unwrap();

        let journal = Journal::default();
        run(&mut graph, &journal).await;
        let printed = graph
            .output_value(yes.text)
            .or_else(|| graph.output_value(no.text))
            .unwrap_or_default();
        (journal, printed)
    }

    #[tokio::test]
    async fn test_true_path() {
        let (journal, printed) = take_branch(true).await;
        assert_eq!(printed, "yes");
        assert_eq!(journal.completed("print"), 1);
    }

    #[tokio::test]
    async fn test_false_path() {
        let (journal, printed) = take_branch(false).await;
        assert_eq!(printed, "no");
        assert_eq!(journal.completed("print"), 1);
    }

    #[tokio::test]
    async fn test_unconnected_condition_defaults_false() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let branch = graph.add_node::<BranchNode>();
        let no = graph.add_node::<PrintNode>();
        graph.connect(start.then, branch.exec);
        graph.connect(branch.on_false, no.exec);

        let journal = Journal::default();
        run(&mut graph, &journal).await;
        assert_eq!(journal.completed("print"), 1);
    }
}
