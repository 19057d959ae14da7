//! Chat Completion Node
//!
//! Asks a host-provided [`ChatClient`] for the next assistant message. The
//! client is looked up as the `dyn ChatClient` service, so a run without one
//! fails this node with `ServiceNotFound`.

use async_trait::async_trait;
use portflow_engine::{
    ExecInPort, ExecOutPort, InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata, NodeType,
    OutputPort, Result,
};

use super::history::{ChatHistory, ChatMessage, ChatRole};
use super::settings::ChatSettings;

/// Produces assistant replies
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Reply to `history`. `settings` is `None` when no endpoint is configured.
    async fn complete(&self, history: &ChatHistory, settings: Option<&ChatSettings>) -> Result<String>;
}

/// Offline client that repeats the last user message
pub struct EchoChatClient;

#[async_trait]
impl ChatClient for EchoChatClient {
    async fn complete(&self, history: &ChatHistory, _settings: Option<&ChatSettings>) -> Result<String> {
        Ok(history
            .last_from(ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

/// Chat Completion Node
///
/// # Inputs
/// - `history` (default empty)
///
/// # Outputs
/// - `reply` - the assistant message text
/// - `history` - the input history with the reply appended
pub struct ChatCompletionNode {
    pub exec: ExecInPort,
    pub then: ExecOutPort,
    pub history: InputPort<ChatHistory>,
    pub reply: OutputPort<String>,
    pub output: OutputPort<ChatHistory>,
}

impl NodeType for ChatCompletionNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "chat-completion".to_string(),
            category: NodeCategory::Chat,
            label: "Chat Completion".to_string(),
            description: "Generates the next assistant message".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            then: builder.exec_out("then"),
            history: builder.input_with_default("history", ChatHistory::new()),
            reply: builder.output("reply"),
            output: builder.output("history"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<ChatCompletionNode>());

#[async_trait]
impl Node for ChatCompletionNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let client = ctx.get_required_service::<dyn ChatClient>()?;
        let settings = ctx.get_service::<ChatSettings>();
        let history = ctx.get(self.history)?;

        log::debug!(
            "ChatCompletionNode {}: requesting reply to {} message(s)",
            ctx.node_id(),
            history.len()
        );
        let reply = client.complete(&history, settings.as_deref()).await?;

        ctx.set(self.output, history.with(ChatMessage::new(ChatRole::Assistant, reply.clone())))?;
        ctx.set(self.reply, reply)?;
        ctx.trigger(self.then);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::AddMessageNode;
    use crate::control::StartNode;
    use crate::testing::{run, Journal};
    use portflow_engine::{Graph, ServiceInstance};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn chat_graph() -> (Graph, portflow_engine::NodeRef<ChatCompletionNode>) {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let add = graph.add_node::<AddMessageNode>();
        let completion = graph.add_node::<ChatCompletionNode>();

        graph.set_input_value(add.content, "ping".to_string()).unwrap();
        graph.connect(add.output, completion.history);
        graph.connect(start.then, add.exec);
        graph.connect(add.then, completion.exec);
        (graph, completion)
    }

    #[tokio::test]
    async fn test_reply_from_registered_client() {
        let (mut graph, completion) = chat_graph();
        let client: Arc<dyn ChatClient> = Arc::new(EchoChatClient);

        let outcome = graph
            .create_executor()
            .with_initializer(ServiceInstance::new(client))
            .execute(&Journal::default(), CancellationToken::new())
            .await;

        assert!(outcome.failed_nodes.is_empty());
        assert_eq!(graph.output_value(completion.reply), Some("ping".to_string()));
        let history = graph.output_value(completion.output).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn test_missing_client_fails_node() {
        let (mut graph, completion) = chat_graph();

        let journal = Journal::default();
        let outcome = run(&mut graph, &journal).await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.failed_nodes, vec![completion.id()]);
        let errors = journal.errors("chat-completion");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Service not found"));
    }
}
