//! Random Node
//!
//! Pure node producing a uniformly distributed number in `[min, max)`.
//! Like every pure node it is evaluated once per execution, so all
//! consumers in a run see the same number.

use async_trait::async_trait;
use portflow_engine::{InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, OutputPort, Result};
use rand::Rng;

pub struct RandomNode {
    pub min: InputPort<f64>,
    pub max: InputPort<f64>,
    pub value: OutputPort<f64>,
}

impl NodeType for RandomNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "random".to_string(),
            category: NodeCategory::Data,
            label: "Random".to_string(),
            description: "Outputs a random number between min and max".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            min: builder.input_with_default("min", 0.0),
            max: builder.input_with_default("max", 1.0),
            value: builder.output("value"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<RandomNode>());

#[async_trait]
impl Node for RandomNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let min = ctx.get(self.min)?;
        let max = ctx.get(self.max)?;
        // An empty or inverted range collapses to `min`.
        let value = if min < max {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        ctx.set(self.value, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portflow_engine::{Graph, NoopObserver};
    use tokio_util::sync::CancellationToken;

    async fn sample(min: f64, max: f64) -> f64 {
        let mut graph = Graph::new();
        let random = graph.add_node::<RandomNode>();
        graph.set_input_value(random.min, min).unwrap();
        graph.set_input_value(random.max, max).unwrap();
        graph
            .create_executor()
            .evaluate(random.id(), &NoopObserver, CancellationToken::new())
            .await
            .unwrap();
        graph.output_value(random.value).unwrap()
    }

    #[tokio::test]
    async fn test_value_within_range() {
        for _ in 0..20 {
            let value = sample(-2.0, 3.0).await;
            assert!((-2.0..3.0).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_empty_range_yields_min() {
        assert_eq!(sample(4.0, 4.0).await, 4.0);
        assert_eq!(sample(5.0, 1.0).await, 5.0);
    }
}
