//! Local Ollama chat API (`POST {host}/api/chat`, non-streaming).

use async_trait::async_trait;
use pipeline::{Capability, CapabilityError, ChatMessage, TextGenerator};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::wire::{to_wire, WireMessage};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<WireMessage>,
}

/// [`TextGenerator`] backed by an Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: crate::http_client(),
            host: host.into(),
            model: model.into(),
        }
    }

    /// `llama3` on `localhost:11434`.
    pub fn local() -> Self {
        Self::new(DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host.trim_end_matches('/'))
    }
}

fn parse_response(body: &str) -> Result<String, CapabilityError> {
    let response: OllamaChatResponse = serde_json::from_str(body).map_err(|e| {
        CapabilityError::new(
            Capability::TextGeneration,
            format!("malformed Ollama response: {e}"),
        )
    })?;

    response
        .message
        .and_then(|m| m.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CapabilityError::empty_response(Capability::TextGeneration))
}

#[async_trait]
impl TextGenerator for OllamaClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, CapabilityError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: to_wire(system_prompt, history),
            stream: false,
        };
        debug!(url = %self.chat_url(), "Sending Ollama chat request");

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::new(Capability::TextGeneration, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::new(Capability::TextGeneration, e.to_string()))?;
        if !status.is_success() {
            return Err(CapabilityError::http_status(
                Capability::TextGeneration,
                status.as_u16(),
                &body,
                None,
            ));
        }

        parse_response(&body)
    }
}
