//! Chat message shapes shared by the OpenAI-style and Ollama APIs.

use pipeline::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Prepends the system prompt and converts the history to wire messages.
pub(crate) fn to_wire(system_prompt: &str, history: &[ChatMessage]) -> Vec<WireMessage> {
    std::iter::once(WireMessage {
        role: "system".to_string(),
        content: Some(system_prompt.to_string()),
    })
    .chain(history.iter().map(|m| WireMessage {
        role: match m.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
        .to_string(),
        content: Some(m.content.clone()),
    }))
    .collect()
}
