//! Chat history values and the nodes that build them

use std::fmt;

use async_trait::async_trait;
use portflow_engine::{
    DataType, ExecInPort, ExecOutPort, InputPort, Node, NodeBuilder, NodeCategory, NodeContext, NodeMetadata,
    NodeType, OutputPort, Property, Result,
};
use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    #[default]
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => f.write_str("system"),
            ChatRole::User => f.write_str("user"),
            ChatRole::Assistant => f.write_str("assistant"),
        }
    }
}

impl DataType for ChatRole {
    fn display(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl DataType for ChatMessage {
    fn display(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

/// Ordered chat messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Copy of this history with `message` appended
    pub fn with(&self, message: ChatMessage) -> Self {
        let mut history = self.clone();
        history.push(message);
        history
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Most recent message from `role`
    pub fn last_from(&self, role: ChatRole) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl DataType for ChatHistory {
    fn display(&self) -> String {
        let lines: Vec<String> = self.messages.iter().map(DataType::display).collect();
        lines.join("\n")
    }
}

/// Add Message Node
///
/// Appends a message to a history. Empty content leaves the history
/// unchanged.
///
/// # Inputs
/// - `history` (default empty)
/// - `content` (default `""`)
///
/// # Properties
/// - `role` (default `user`)
///
/// # Outputs
/// - `history` - the history with the message appended
pub struct AddMessageNode {
    pub exec: ExecInPort,
    pub then: ExecOutPort,
    pub history: InputPort<ChatHistory>,
    pub content: InputPort<String>,
    pub role: Property<ChatRole>,
    pub output: OutputPort<ChatHistory>,
}

impl NodeType for AddMessageNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "add-message".to_string(),
            category: NodeCategory::Chat,
            label: "Add Message".to_string(),
            description: "Appends a message to a chat history".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            exec: builder.exec_in("exec"),
            then: builder.exec_out("then"),
            history: builder.input_with_default("history", ChatHistory::new()),
            content: builder.input_with_default("content", String::new()),
            role: builder.property("role", ChatRole::User),
            output: builder.output("history"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<AddMessageNode>());

#[async_trait]
impl Node for AddMessageNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let history = ctx.get(self.history)?;
        let content = ctx.get(self.content)?;

        let history = if content.is_empty() {
            log::debug!("AddMessageNode {}: empty content, history unchanged", ctx.node_id());
            history
        } else {
            let role = ctx.property(self.role)?;
            history.with(ChatMessage::new(role, content))
        };

        ctx.set(self.output, history)?;
        ctx.trigger(self.then);
        Ok(())
    }
}

/// History Length Node
///
/// Pure node counting the messages of a history.
pub struct HistoryLengthNode {
    pub history: InputPort<ChatHistory>,
    pub length: OutputPort<i32>,
}

impl NodeType for HistoryLengthNode {
    fn metadata() -> NodeMetadata {
        NodeMetadata {
            node_type: "history-length".to_string(),
            category: NodeCategory::Chat,
            label: "History Length".to_string(),
            description: "Number of messages in a chat history".to_string(),
            entry: false,
        }
    }

    fn create(builder: &mut NodeBuilder) -> Self {
        Self {
            history: builder.input_with_default("history", ChatHistory::new()),
            length: builder.output("length"),
        }
    }
}

inventory::submit!(portflow_engine::NodeRegistration::of::<HistoryLengthNode>());

#[async_trait]
impl Node for HistoryLengthNode {
    async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let history = ctx.get(self.history)?;
        ctx.set(self.length, history.len() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartNode;
    use crate::debug::PrintNode;
    use crate::testing::{run, Journal};
    use portflow_engine::{Graph, NoopObserver};
    use tokio_util::sync::CancellationToken;

    /// `Start -> AddMessage(content) -> Print(Length)`
    async fn length_after_adding(content: &str) -> i32 {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let add = graph.add_node::<AddMessageNode>();
        let length = graph.add_node::<HistoryLengthNode>();
        let print = graph.add_node::<PrintNode>();

        graph.set_input_value(add.content, content.to_string()).unwrap();
        assert!(graph.connect(add.output, length.history));
        assert!(graph.connect(length.length, print.value));
        graph.connect(start.then, add.exec);
        graph.connect(add.then, print.exec);

        let outcome = run(&mut graph, &Journal::default()).await;
        assert!(outcome.is_completed());
        graph.output_value(length.length).unwrap()
    }

    #[tokio::test]
    async fn test_non_empty_content_appends() {
        assert_eq!(length_after_adding("hi").await, 1);
    }

    #[tokio::test]
    async fn test_empty_content_does_not_append() {
        assert_eq!(length_after_adding("").await, 0);
    }

    #[tokio::test]
    async fn test_chained_messages_keep_roles() {
        let mut graph = Graph::new();
        let start = graph.add_node::<StartNode>();
        let system = graph.add_node::<AddMessageNode>();
        let user = graph.add_node::<AddMessageNode>();

        graph.set_property(system.id(), system.role, ChatRole::System).unwrap();
        graph.set_input_value(system.content, "be brief".to_string()).unwrap();
        graph.set_input_value(user.content, "hello".to_string()).unwrap();
        graph.connect(system.output, user.history);
        graph.connect(start.then, system.exec);
        graph.connect(system.then, user.exec);

        run(&mut graph, &Journal::default()).await;
        let history = graph.output_value(user.output).unwrap();
        assert_eq!(
            history.messages(),
            &[
                ChatMessage::new(ChatRole::System, "be brief"),
                ChatMessage::new(ChatRole::User, "hello"),
            ]
        );
        assert_eq!(history.display(), "system: be brief\nuser: hello");
    }

    #[tokio::test]
    async fn test_length_evaluates_on_demand() {
        let mut graph = Graph::new();
        let length = graph.add_node::<HistoryLengthNode>();
        let history = ChatHistory::new()
            .with(ChatMessage::new(ChatRole::User, "a"))
            .with(ChatMessage::new(ChatRole::Assistant, "b"));
        graph.set_input_value(length.history, history).unwrap();

        graph
            .create_executor()
            .evaluate(length.id(), &NoopObserver, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(graph.output_value(length.length), Some(2));
    }

    #[test]
    fn test_history_serializes_as_list() {
        let history = ChatHistory::new().with(ChatMessage::new(ChatRole::Assistant, "ok"));
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json, serde_json::json!([{ "role": "assistant", "content": "ok" }]));
    }
}
