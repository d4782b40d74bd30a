//! Azure OpenAI DALL·E 3 image generation.

use async_trait::async_trait;
use llm::AzureCredentials;
use pipeline::{AssetReference, Capability, CapabilityError, ImageGenerator, ImageReference};
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

pub const DALL_E_DEPLOYMENT: &str = "dall-e-3";
pub const DALL_E_API_VERSION: &str = "2024-02-01";

const DEFAULT_STYLE: &str = "photorealistic";
const IMAGE_SIZE: &str = "1024x1024";
const IMAGE_QUALITY: &str = "standard";

#[derive(Debug, Serialize)]
struct ImageRequest {
    prompt: String,
    size: &'static str,
    quality: &'static str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// [`ImageGenerator`] backed by an Azure OpenAI DALL·E 3 deployment.
pub struct AzureImageGenerator {
    client: reqwest::Client,
    credentials: AzureCredentials,
    style: String,
}

impl AzureImageGenerator {
    /// `api_key` and `endpoint` address the image resource; the deployment
    /// and API version default to DALL·E 3 on `2024-02-01`.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::with_credentials(
            AzureCredentials::new(api_key, endpoint)
                .with_deployment(DALL_E_DEPLOYMENT)
                .with_api_version(DALL_E_API_VERSION),
        )
    }

    pub fn with_credentials(credentials: AzureCredentials) -> Self {
        Self {
            client: crate::http_client(),
            credentials,
            style: DEFAULT_STYLE.to_string(),
        }
    }

    /// Visual style appended to every prompt.
    #[must_use]
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    fn generations_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/images/generations?api-version={}",
            self.credentials.endpoint.trim_end_matches('/'),
            self.credentials.deployment,
            self.credentials.api_version
        )
    }

    fn build_request(&self, prompt: &str) -> ImageRequest {
        ImageRequest {
            prompt: format!("{prompt}, {} style", self.style),
            size: IMAGE_SIZE,
            quality: IMAGE_QUALITY,
            n: 1,
        }
    }
}

fn parse_response(body: &str) -> Result<AssetReference, CapabilityError> {
    let response: ImageResponse = serde_json::from_str(body).map_err(|e| {
        CapabilityError::new(
            Capability::ImageGeneration,
            format!("malformed image response: {e}"),
        )
    })?;

    response
        .data
        .into_iter()
        .find_map(|d| d.url.and_then(|u| AssetReference::new(u)))
        .ok_or_else(|| CapabilityError::empty_response(Capability::ImageGeneration))
}

#[async_trait]
impl ImageGenerator for AzureImageGenerator {
    #[instrument(skip_all, fields(deployment = %self.credentials.deployment, style = %self.style))]
    async fn generate_image(&self, prompt: &str) -> Result<ImageReference, CapabilityError> {
        let request = self.build_request(prompt);
        debug!(prompt = %request.prompt, "Requesting image");

        let response = self
            .client
            .post(self.generations_url())
            .header("api-key", &self.credentials.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::new(Capability::ImageGeneration, e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::new(Capability::ImageGeneration, e.to_string()))?;

        if !status.is_success() {
            return Err(CapabilityError::http_status(
                Capability::ImageGeneration,
                status.as_u16(),
                &body,
                retry_after.as_deref(),
            ));
        }

        let asset = parse_response(&body)?;
        info!(asset = %asset, "Image generated");
        Ok(ImageReference {
            asset,
            prompt: prompt.to_string(),
            style: self.style.clone(),
        })
    }
}
