//! Inkwell tool adapters.
//!
//! Implements [`pipeline::SearchTool`] over the Tavily search API and
//! [`pipeline::ImageGenerator`] over an Azure OpenAI DALL·E 3 deployment.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request formatting, authentication headers, and
//! response parsing live here. Failures surface as
//! [`pipeline::CapabilityError`] tagged with the matching
//! [`pipeline::Capability`], so the engine's retry policy treats tools and
//! text generation alike.

mod image;
mod search;

pub use image::{AzureImageGenerator, DALL_E_API_VERSION, DALL_E_DEPLOYMENT};
pub use search::{TavilyCredentials, TavilySearch, TAVILY_SEARCH_URL};

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(llm::REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}
