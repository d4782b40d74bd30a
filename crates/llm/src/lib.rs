//! Inkwell text-generation adapters.
//!
//! Implements the [`pipeline::TextGenerator`] trait for Azure OpenAI chat
//! completions and for a local Ollama server. Further providers are added as
//! new modules in this crate without any changes to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, and response
//! parsing live here. The [`pipeline`] crate sees only
//! [`pipeline::TextGenerator`]; every failure is reported as a
//! [`pipeline::CapabilityError`] so the workflow engine can apply its retry
//! policy uniformly.

mod azure;
mod ollama;
mod wire;

pub use azure::{AzureCredentials, AzureOpenAiClient, DEFAULT_API_VERSION, DEFAULT_DEPLOYMENT};
pub use ollama::{OllamaClient, DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL};

use std::time::Duration;

/// Per-request HTTP timeout. The engine's stage deadline still applies on top.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}
