//! Chat nodes
//!
//! Chat history values, nodes that build histories, and a completion node
//! backed by a host-provided client service.

mod completion;
mod history;
mod settings;

pub use completion::{ChatClient, ChatCompletionNode, EchoChatClient};
pub use history::{AddMessageNode, ChatHistory, ChatMessage, ChatRole, HistoryLengthNode};
pub use settings::{ChatSettings, ChatSettingsInitializer};
