//! Capability port traits.
//!
//! The workflow reaches every external system through one of these traits.
//! Infrastructure crates (`llm`, `tools`) implement them; stage agents only
//! ever hold `Arc<dyn …>` handles.
//!
//! Implementations are shared across concurrent runs, so they must be
//! `Send + Sync` and must not retain run-specific data between calls.

use async_trait::async_trait;

use crate::{CapabilityError, ChatMessage, ImageReference, SearchHit};

/// Large-language-model text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates the next assistant turn for `history` under `system_prompt`.
    ///
    /// Transport, authentication, and rate-limit failures are all reported as
    /// a [`CapabilityError`]. Implementations may return an empty string;
    /// callers decide whether that is acceptable.
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, CapabilityError>;
}

/// Web search.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Runs `query` and returns at most `max_results` hits, best first.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, CapabilityError>;
}

/// Image generation.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates one image for `prompt`.
    async fn generate_image(&self, prompt: &str) -> Result<ImageReference, CapabilityError>;
}
