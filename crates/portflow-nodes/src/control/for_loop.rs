//! For Loop Node
//!
//! Runs its body branch once per index in `[first, last)`. Each iteration
//! runs to completion before the next one starts, then `completed` fires.
//!
//! Pure nodes feeding the body are evaluated once per execution, so an
//! iteration sees the index through its direct connection only.

use async_trait::async_trait;
use portflow_engine::{
    EngineError, ExecInPort, ExecOutPort, InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata,
    NodeType, OutputPort, Result,
};

/// For Loop Node
///
/// # Inputs
/// - `first` (default `0`) - first index
/// - `last` (default `10`) - index to stop before
///
/// # Outputs
/// - `index` - current index, written before each iteration
///
/// # Exec outputs
/// - `body` - run once per index
/// - `completed` - fired after the last iteration
pub struct ForLoopNode {
    pub exec: ExecInPort,
    pub first: InputPort<i32>,
    pub last: InputPort<i32>,
    pub body: ExecOutPort,
    pub index: OutputPort<i32>,
    pub completed: ExecOutPort,
}

impl NodeType for ForLoopNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "for-loop".to_string(),
            category: NodeCategory::Control,
            label: "For Loop".to_string(),
            description: "Runs the body once for each index in a range".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            first: builder.input_with_default("first", 0),
            last: builder.input_with_default("last", 10),
            body: builder.exec_out("body"),
            index: builder.output("index"),
            completed: builder.exec_out("completed"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<ForLoopNode>());

#[async_trait]
impl Node for ForLoopNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let first = ctx.get(self.first)?;
        let last = ctx.get(self.last)?;
        log::debug!("ForLoopNode {}: iterating {}..{}", ctx.node_id(), first, last);

        for index in first..last {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            ctx.set(self.index, index)?;
            ctx.run_branch(self.body).await?;
        }

        ctx.trigger(self.completed);
        Ok(())
    }
}
