//! Per-run workflow configuration.
//!
//! [`WorkflowConfig`] is the validated, immutable record the engine copies by
//! value at construction. [`WorkflowConfigFile`] is its raw, partially
//! populated form as read from a config file or command-line flags; the only
//! way from one to the other is [`TryFrom`], which rejects invalid values
//! with a [`ConfigError`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ---------------------------------------------------------------------------
// Editor style
// ---------------------------------------------------------------------------

/// Narrative register the Editor stage rewrites the draft into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EditorStyle {
    /// Polished, neutral magazine prose.
    #[default]
    General,
    /// Human-interest storytelling that foregrounds feelings and stakes.
    Emotional,
    /// Comic retelling that keeps every fact intact.
    Hilarious,
    /// Sceptical analysis that probes claims and weak evidence.
    Critical,
    /// Colloquial written Cantonese.
    Cantonese,
}

impl EditorStyle {
    /// Every style, in presentation order.
    pub const ALL: [EditorStyle; 5] = [
        EditorStyle::General,
        EditorStyle::Emotional,
        EditorStyle::Hilarious,
        EditorStyle::Critical,
        EditorStyle::Cantonese,
    ];

    /// The canonical name of the style.
    pub fn as_str(self) -> &'static str {
        match self {
            EditorStyle::General => "General",
            EditorStyle::Emotional => "Emotional",
            EditorStyle::Hilarious => "Hilarious",
            EditorStyle::Critical => "Critical",
            EditorStyle::Cantonese => "Cantonese",
        }
    }
}

impl std::fmt::Display for EditorStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditorStyle {
    type Err = ConfigError;

    /// Parses a style name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        EditorStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownEditorStyle(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Image failure policy
// ---------------------------------------------------------------------------

/// What the Editor does when the image-generation capability fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFailurePolicy {
    /// Fail the attempt like any other external call; the engine retries it.
    #[default]
    Retry,
    /// Log a warning and finish the article without the image.
    Skip,
}

impl FromStr for ImageFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(ImageFailurePolicy::Retry),
            "skip" => Ok(ImageFailurePolicy::Skip),
            _ => Err(ConfigError::UnknownImageFailurePolicy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Upper bound for the exponential retry back-off.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Immutable configuration of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Emit per-stage progress events at `info` level (otherwise `debug`).
    pub enable_logging: bool,
    /// Time budget for each stage, covering all of its attempts.
    pub timeout_seconds: Option<u64>,
    /// Extra attempts allowed per stage after the first one fails.
    pub retry_attempts: u32,
    /// Which Editor template to use.
    pub editor_style: EditorStyle,
    /// Whether the Editor attaches a generated image.
    pub enable_image_generation: bool,
    /// Delay before the first retry; doubled on each further retry and capped
    /// at [`MAX_RETRY_BACKOFF`]. Zero retries immediately.
    pub retry_backoff: Duration,
    /// Behaviour when image generation fails.
    pub image_failure_policy: ImageFailurePolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            enable_logging: true,
            timeout_seconds: None,
            retry_attempts: 3,
            editor_style: EditorStyle::General,
            enable_image_generation: true,
            retry_backoff: Duration::ZERO,
            image_failure_policy: ImageFailurePolicy::Retry,
        }
    }
}

impl WorkflowConfig {
    /// Checks invariants that the field types alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == Some(0) {
            return Err(ConfigError::NonPositiveTimeout(0));
        }
        Ok(())
    }

    /// Per-stage time budget, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Hard upper bound on attempts for any one stage.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Back-off to apply before attempt `next_attempt` (2-based: the first
    /// retry is attempt 2).
    pub fn backoff_before(&self, next_attempt: u32) -> Duration {
        if self.retry_backoff.is_zero() || next_attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (next_attempt - 2).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_RETRY_BACKOFF)
    }
}

// ---------------------------------------------------------------------------
// Raw configuration
// ---------------------------------------------------------------------------

/// Unvalidated configuration as read from a file or the command line.
///
/// Every field is optional; unset fields take the [`WorkflowConfig`] default.
/// Numeric fields are signed so that out-of-range input is reported as a
/// [`ConfigError`] rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfigFile {
    pub enable_logging: Option<bool>,
    pub timeout_seconds: Option<i64>,
    pub retry_attempts: Option<i64>,
    pub editor_style: Option<String>,
    pub enable_image_generation: Option<bool>,
    pub retry_backoff_ms: Option<u64>,
    pub image_failure_policy: Option<String>,
}

impl WorkflowConfigFile {
    /// Layers `overrides` on top of `self`; fields set in `overrides` win.
    #[must_use]
    pub fn merge(self, overrides: WorkflowConfigFile) -> Self {
        Self {
            enable_logging: overrides.enable_logging.or(self.enable_logging),
            timeout_seconds: overrides.timeout_seconds.or(self.timeout_seconds),
            retry_attempts: overrides.retry_attempts.or(self.retry_attempts),
            editor_style: overrides.editor_style.or(self.editor_style),
            enable_image_generation: overrides
                .enable_image_generation
                .or(self.enable_image_generation),
            retry_backoff_ms: overrides.retry_backoff_ms.or(self.retry_backoff_ms),
            image_failure_policy: overrides.image_failure_policy.or(self.image_failure_policy),
        }
    }
}

impl TryFrom<WorkflowConfigFile> for WorkflowConfig {
    type Error = ConfigError;

    fn try_from(raw: WorkflowConfigFile) -> Result<Self, Self::Error> {
        let defaults = WorkflowConfig::default();

        let retry_attempts = match raw.retry_attempts {
            None => defaults.retry_attempts,
            Some(n) if n < 0 => return Err(ConfigError::NegativeRetryAttempts(n)),
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::RetryAttemptsTooLarge(n))?,
        };

        let timeout_seconds = match raw.timeout_seconds {
            None => None,
            Some(n) if n <= 0 => return Err(ConfigError::NonPositiveTimeout(n)),
            Some(n) => Some(n as u64),
        };

        let editor_style = raw
            .editor_style
            .as_deref()
            .map(EditorStyle::from_str)
            .transpose()?
            .unwrap_or(defaults.editor_style);

        let image_failure_policy = raw
            .image_failure_policy
            .as_deref()
            .map(ImageFailurePolicy::from_str)
            .transpose()?
            .unwrap_or(defaults.image_failure_policy);

        let config = WorkflowConfig {
            enable_logging: raw.enable_logging.unwrap_or(defaults.enable_logging),
            timeout_seconds,
            retry_attempts,
            editor_style,
            enable_image_generation: raw
                .enable_image_generation
                .unwrap_or(defaults.enable_image_generation),
            retry_backoff: raw
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            image_failure_policy,
        };
        config.validate()?;

        tracing::debug!(?config, "Workflow configuration validated");
        Ok(config)
    }
}
