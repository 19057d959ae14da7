//! Math nodes
//!
//! Pure arithmetic and comparison on numbers. Integer sources connect
//! through the engine's widening conversions.

use async_trait::async_trait;
use portflow_engine::{InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, OutputPort, Result};

/// Binary operation over two `f64` inputs
pub struct BinaryNode<Op: BinaryOp> {
    pub a: InputPort<f64>,
    pub b: InputPort<f64>,
    pub result: OutputPort<Op::Output>,
}

/// What a [`BinaryNode`] computes
pub trait BinaryOp: Send + Sync + 'static {
    type Output: portflow_engine::DataType;

    const NODE_TYPE: &'static str;
    const LABEL: &'static str;
    const DESCRIPTION: &'static str;

    fn apply(a: f64, b: f64) -> Self::Output;
}

impl<Op: BinaryOp> NodeType for BinaryNode<Op> {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: Op::NODE_TYPE.to_string(),
            category: NodeCategory::Math,
            label: Op::LABEL.to_string(),
            description: Op::DESCRIPTION.to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            a: builder.input_with_default("a", 0.0),
            b: builder.input_with_default("b", 0.0),
            result: builder.output("result"),
        }
    }
}

#[async_trait]
impl<Op: BinaryOp> Node for BinaryNode<Op> {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let a = ctx.get(self.a)?;
        let b = ctx.get(self.b)?;
        ctx.set(self.result, Op::apply(a, b))
    }
}

pub struct Add;

impl BinaryOp for Add {
    type Output = f64;

    const NODE_TYPE: &'static str = "add";
    const LABEL: &'static str = "Add";
    const DESCRIPTION: &'static str = "Adds two numbers";

    fn apply(a: f64, b: f64) -> f64 {
        a + b
    }
}

pub struct Multiply;

impl BinaryOp for Multiply {
    type Output = f64;

    const NODE_TYPE: &'static str = "multiply";
    const LABEL: &'static str = "Multiply";
    const DESCRIPTION: &'static str = "Multiplies two numbers";

    fn apply(a: f64, b: f64) -> f64 {
        a * b
    }
}

pub struct GreaterThan;

impl BinaryOp for GreaterThan {
    type Output = bool;

    const NODE_TYPE: &'static str = "greater-than";
    const LABEL: &'static str = "Greater Than";
    const DESCRIPTION: &'static str = "Whether a is greater than b";

    fn apply(a: f64, b: f64) -> bool {
        a > b
    }
}

pub type AddNode = BinaryNode<Add>;
pub type MultiplyNode = BinaryNode<Multiply>;
pub type GreaterThanNode = BinaryNode<GreaterThan>;

inventory::submit!(portflow_engine::NodeRegistration::of::<AddNode>());
inventory::submit!(portflow_engine::NodeRegistration::of::<MultiplyNode>());
inventory::submit!(portflow_engine::NodeRegistration::of::<GreaterThanNode>());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{I32Constant, I8Constant};
    use portflow_engine::{Graph, NoopObserver};
    use tokio_util::sync::CancellationToken;

    async fn evaluate(graph: &mut Graph, node: portflow_engine::NodeId) {
        graph
            .create_executor()
            .evaluate(node, &NoopObserver, CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_widens_integer_sources() {
        let mut graph = Graph::new();
        let small = graph.add_node::<I8Constant>();
        let large = graph.add_node::<I32Constant>();
        let add = graph.add_node::<AddNode>();

        graph.set_property(small.id(), small.value, -3).unwrap();
        graph.set_property(large.id(), large.value, 40_000).unwrap();
        assert!(graph.connect(small.output, add.a));
        assert!(graph.connect(large.output, add.b));

        evaluate(&mut graph, add.id()).await;
        assert_eq!(graph.output_value(add.result), Some(39_997.0));
    }

    #[tokio::test]
    async fn test_multiply_and_compare() {
        let mut graph = Graph::new();
        let multiply = graph.add_node::<MultiplyNode>();
        let compare = graph.add_node::<GreaterThanNode>();

        graph.set_input_value(multiply.a, 1.5).unwrap();
        graph.set_input_value(multiply.b, 4.0).unwrap();
        graph.set_input_value(compare.b, 5.0).unwrap();
        graph.connect(multiply.result, compare.a);

        evaluate(&mut graph, compare.id()).await;
        assert_eq!(graph.output_value(multiply.result), Some(6.0));
        assert_eq!(graph.output_value(compare.result), Some(true));
    }

    #[test]
    fn test_bool_result_does_not_feed_numbers() {
        let mut graph = Graph::new();
        let compare = graph.add_node::<GreaterThanNode>();
        let add = graph.add_node::<AddNode>();
        assert!(!graph.can_connect(compare.result, add.a));
    }
}
