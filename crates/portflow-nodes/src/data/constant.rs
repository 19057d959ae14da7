//! Constant Nodes
//!
//! Pure nodes that output the value of their `value` property. One node
//! type is registered per supported value type.

use async_trait::async_trait;
use portflow_engine::{
    DataType, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType, OutputPort, Property, Result,
};

/// Constant Node
///
/// # Properties
/// - `value` - the constant, defaults to `T::default()`
///
/// # Outputs
/// - `value` - the constant
pub struct ConstantNode<T> {
    pub value: Property<T>,
    pub output: OutputPort<T>,
}

impl<T: DataType + Default> ConstantNode<T> {
    fn build(builder: &mut NodeBuilder) -> Self {
        Self {
            value: builder.property("value", T::default()),
            output: builder.output("value"),
        }
    }
}

#[async_trait]
impl<T: DataType + Default> Node for ConstantNode<T> {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let value = ctx.property(self.value)?;
        ctx.set(self.output, value)
    }
}

macro_rules! constant_node_types {
    ($($alias:ident: $ty:ty => $node_type:literal, $label:literal;)*) => {
        $(
            pub type $alias = ConstantNode<$ty>;

            impl NodeType for ConstantNode<$ty> {
                fn metadata() -> NodeMetadata {
                    NodeMetadata {
                        node_type: $node_type.to_string(),
                        category: NodeCategory::Data,
                        label: $label.to_string(),
                        description: concat!("Outputs a constant ", $label, " value").to_string(),
                        entry: false,
                    }
                }

                fn create(builder: &mut NodeBuilder) -> Self {
                    Self::build(builder)
                }
            }

            inventory::submit!(portflow_engine::NodeRegistration::of::<ConstantNode<$ty>>());
        )*
    };
}

constant_node_types! {
    BoolConstant: bool => "constant-bool", "Boolean";
    I8Constant: i8 => "constant-i8", "Small Integer";
    I32Constant: i32 => "constant-i32", "Integer";
    F64Constant: f64 => "constant-f64", "Number";
    StringConstant: String => "constant-string", "Text";
}

#[cfg(test)]
mod tests {
    use super::*;
    use portflow_engine::{Graph, GraphSnapshot, NodeRegistry, NoopObserver};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_outputs_property_value() {
        let mut graph = Graph::new();
        let text = graph.add_node::<StringConstant>();
        graph.set_property(text.id(), text.value, "hello".to_string()).unwrap();

        graph
            .create_executor()
            .evaluate(text.id(), &NoopObserver, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(graph.output_value(text.output), Some("hello".to_string()));
    }

    #[test]
    fn test_property_survives_snapshot() {
        let mut graph = Graph::new();
        let number = graph.add_node::<F64Constant>();
        graph.set_property(number.id(), number.value, 2.5).unwrap();

        let json = graph.snapshot().unwrap().to_json().unwrap();
        let restored = Graph::from_snapshot(&GraphSnapshot::from_json(&json).unwrap(), &NodeRegistry::with_builtins())
            .unwrap();
        assert_eq!(restored.property(number.id(), number.value).unwrap(), 2.5);
    }

    #[test]
    fn test_distinct_node_types() {
        assert_eq!(I8Constant::metadata().node_type, "constant-i8");
        assert_eq!(I32Constant::metadata().node_type, "constant-i32");
        assert_eq!(BoolConstant::metadata().label, "Boolean");
    }
}
