//! Sequence Node
//!
//! Fires its outputs one after another. Each output's branch runs to its
//! end before the next output starts.

use async_trait::async_trait;
use portflow_engine::{ExecInPort, ExecOutPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, Result};

/// Number of outputs on a sequence node
pub const SEQUENCE_OUTPUTS: usize = 3;

/// Sequence Node
///
/// # Exec outputs
/// - `then_0`, `then_1`, `then_2` - fired in order
pub struct SequenceNode {
    pub exec: ExecInPort,
    pub outputs: [ExecOutPort; SEQUENCE_OUTPUTS],
}

impl NodeType for SequenceNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "sequence".to_string(),
            category: NodeCategory::Control,
            label: "Sequence".to_string(),
            description: "Runs several paths one after another".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        let exec = builder.exec_in("exec");
        let outputs = std::array::from_fn(|i| builder.exec_out(&format!("then_{}", i)));
        Self { exec, outputs }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<SequenceNode>());

#[async_trait]
impl Node for SequenceNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        for output in self.outputs {
            ctx.trigger(output);
        }
        Ok(())
    }
}
