//! Command-line arguments, config-file loading, and capability construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use llm::{AzureCredentials, AzureOpenAiClient, OllamaClient};
use nodes::Capabilities;
use pipeline::{TextGenerator, WorkflowConfig, WorkflowConfigFile};
use serde::Deserialize;
use tools::{AzureImageGenerator, TavilyCredentials, TavilySearch};
use tracing::warn;

use crate::observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "inkwell", version, about = "Research, write, and edit an article with LLM agents")]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP/gRPC endpoint for trace export.
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the workflow for one topic.
    Generate(GenerateArgs),

    /// Print the effective prompt templates.
    Templates {
        /// Only show the editor template for this style.
        #[arg(long)]
        style: Option<String>,

        /// Directory of template overrides.
        #[arg(long)]
        prompts_dir: Option<PathBuf>,
    },

    /// Check a configuration file without running anything.
    ValidateConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Provider {
    #[default]
    Azure,
    Ollama,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[arg(long)]
    pub topic: String,

    /// Target article length in words.
    #[arg(long, default_value_t = 500)]
    pub words: u32,

    /// Editor style: General, Emotional, Hilarious, Critical, or Cantonese.
    #[arg(long)]
    pub style: Option<String>,

    /// Extra attempts per stage after a failure.
    #[arg(long, allow_negative_numbers = true)]
    pub retries: Option<i64>,

    /// Per-stage time budget in seconds.
    #[arg(long, allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// Delay before the first retry in milliseconds, doubled per retry.
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Skip image generation.
    #[arg(long)]
    pub no_images: bool,

    /// What to do when image generation fails: retry or skip.
    #[arg(long)]
    pub on_image_failure: Option<String>,

    #[arg(long, value_enum, default_value_t = Provider::Azure)]
    pub provider: Provider,

    /// Directory of template overrides.
    #[arg(long)]
    pub prompts_dir: Option<PathBuf>,

    /// TOML file with a `[workflow]` table.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the article here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print the full workflow state as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args)]
pub struct CredentialArgs {
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub azure_openai_api_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_openai_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", default_value = llm::DEFAULT_DEPLOYMENT)]
    pub azure_openai_deployment: String,

    #[arg(long, env = "OPENAI_API_VERSION", default_value = llm::DEFAULT_API_VERSION)]
    pub openai_api_version: String,

    #[arg(long, env = "AZURE_DALL_E_3_ENDPOINT")]
    pub azure_dall_e_3_endpoint: Option<String>,

    #[arg(long, env = "AZURE_DALL_E_3_API_KEY", hide_env_values = true)]
    pub azure_dall_e_3_api_key: Option<String>,

    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    #[arg(long, env = "OLLAMA_HOST", default_value = llm::DEFAULT_OLLAMA_HOST)]
    pub ollama_host: String,

    #[arg(long, default_value = llm::DEFAULT_OLLAMA_MODEL)]
    pub ollama_model: String,
}

fn redacted(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}

impl std::fmt::Debug for CredentialArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialArgs")
            .field("azure_openai_api_key", &redacted(&self.azure_openai_api_key))
            .field("azure_openai_endpoint", &self.azure_openai_endpoint)
            .field("azure_openai_deployment", &self.azure_openai_deployment)
            .field("openai_api_version", &self.openai_api_version)
            .field("azure_dall_e_3_endpoint", &self.azure_dall_e_3_endpoint)
            .field("azure_dall_e_3_api_key", &redacted(&self.azure_dall_e_3_api_key))
            .field("tavily_api_key", &redacted(&self.tavily_api_key))
            .field("ollama_host", &self.ollama_host)
            .field("ollama_model", &self.ollama_model)
            .finish()
    }
}

/// Top-level layout of an `inkwell.toml` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    workflow: WorkflowConfigFile,
}

/// Reads the `[workflow]` table of a config file.
pub fn load_config_file(path: &Path) -> anyhow::Result<WorkflowConfigFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let file: SettingsFile = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(file.workflow)
}

impl GenerateArgs {
    /// Flag values as config overrides; unset flags leave the file value.
    fn overrides(&self) -> WorkflowConfigFile {
        WorkflowConfigFile {
            timeout_seconds: self.timeout,
            retry_attempts: self.retries,
            editor_style: self.style.clone(),
            enable_image_generation: self.no_images.then_some(false),
            retry_backoff_ms: self.backoff_ms,
            image_failure_policy: self.on_image_failure.clone(),
            ..Default::default()
        }
    }

    /// Config file (if any) overlaid with command-line flags, validated.
    pub fn workflow_config(&self) -> anyhow::Result<WorkflowConfig> {
        let file = match &self.config {
            Some(path) => load_config_file(path)?,
            None => WorkflowConfigFile::default(),
        };
        let config = WorkflowConfig::try_from(file.merge(self.overrides()))
            .context("invalid workflow configuration")?;
        Ok(config)
    }

    /// Builds the capability set for the chosen provider.
    ///
    /// Search is optional; without a Tavily key the researcher works from the
    /// model's own knowledge. Image generation is only wired when enabled.
    pub fn capabilities(&self, config: &WorkflowConfig) -> anyhow::Result<Capabilities> {
        let creds = &self.credentials;

        let text: Arc<dyn TextGenerator> = match self.provider {
            Provider::Azure => {
                let (Some(key), Some(endpoint)) =
                    (&creds.azure_openai_api_key, &creds.azure_openai_endpoint)
                else {
                    bail!("the azure provider needs AZURE_OPENAI_API_KEY and AZURE_OPENAI_ENDPOINT");
                };
                Arc::new(AzureOpenAiClient::new(
                    AzureCredentials::new(key, endpoint)
                        .with_deployment(&creds.azure_openai_deployment)
                        .with_api_version(&creds.openai_api_version),
                ))
            }
            Provider::Ollama => Arc::new(OllamaClient::new(&creds.ollama_host, &creds.ollama_model)),
        };
        let mut capabilities = Capabilities::new(text);

        match &creds.tavily_api_key {
            Some(key) => {
                capabilities = capabilities
                    .with_search(Arc::new(TavilySearch::new(TavilyCredentials::new(key))));
            }
            None => warn!("TAVILY_API_KEY is not set; researching without web search"),
        }

        if config.enable_image_generation {
            let (Some(key), Some(endpoint)) =
                (&creds.azure_dall_e_3_api_key, &creds.azure_dall_e_3_endpoint)
            else {
                bail!(
                    "image generation needs AZURE_DALL_E_3_API_KEY and AZURE_DALL_E_3_ENDPOINT \
                     (or pass --no-images)"
                );
            };
            capabilities = capabilities.with_images(Arc::new(AzureImageGenerator::new(key, endpoint)));
        }

        Ok(capabilities)
    }
}
