//! Azure OpenAI chat completions.
//!
//! | Item         | Value                                                                   |
//! |--------------|-------------------------------------------------------------------------|
//! | Endpoint     | `{endpoint}/openai/deployments/{deployment}/chat/completions`           |
//! | Query        | `api-version={api_version}`                                             |
//! | Auth header  | `api-key: {key}`                                                        |
//! | Rate limits  | `429` with `Retry-After` (seconds)                                      |

use async_trait::async_trait;
use pipeline::{Capability, CapabilityError, ChatMessage, TextGenerator};
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::wire::{to_wire, WireMessage};

pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

/// Connection details for an Azure OpenAI resource.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub api_key: String,
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureCredentials {
    /// Credentials for the default deployment and API version.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// The chat completions URL for this deployment.
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: WireMessage,
}

/// [`TextGenerator`] backed by an Azure OpenAI chat deployment.
pub struct AzureOpenAiClient {
    client: reqwest::Client,
    credentials: AzureCredentials,
}

impl AzureOpenAiClient {
    pub fn new(credentials: AzureCredentials) -> Self {
        Self::with_http_client(crate::http_client(), credentials)
    }

    /// Uses a caller-supplied HTTP client, e.g. one shared with other adapters.
    pub fn with_http_client(client: reqwest::Client, credentials: AzureCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn credentials(&self) -> &AzureCredentials {
        &self.credentials
    }
}

fn build_request(system_prompt: &str, history: &[ChatMessage]) -> ChatCompletionRequest {
    ChatCompletionRequest {
        messages: to_wire(system_prompt, history),
    }
}

/// Extracts the first choice's content.
fn parse_response(body: &str) -> Result<String, CapabilityError> {
    let response: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        CapabilityError::new(
            Capability::TextGeneration,
            format!("malformed chat completion response: {e}"),
        )
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CapabilityError::empty_response(Capability::TextGeneration))
}

#[async_trait]
impl TextGenerator for AzureOpenAiClient {
    #[instrument(skip_all, fields(deployment = %self.credentials.deployment))]
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, CapabilityError> {
        let request = build_request(system_prompt, history);
        debug!(messages = request.messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(self.credentials.chat_completions_url())
            .header("api-key", &self.credentials.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::new(Capability::TextGeneration, e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::new(Capability::TextGeneration, e.to_string()))?;

        if !status.is_success() {
            return Err(CapabilityError::http_status(
                Capability::TextGeneration,
                status.as_u16(),
                &body,
                retry_after.as_deref(),
            ));
        }

        let text = parse_response(&body)?;
        debug!(chars = text.len(), "Chat completion received");
        Ok(text)
    }
}
