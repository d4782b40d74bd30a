//! Error taxonomy and retry-policy types for the Inkwell workflow domain.
//!
//! Three layers of error exist:
//!
//! - [`CapabilityError`]: an external capability (text generation, search,
//!   image generation) failed. Produced by infrastructure crates.
//! - [`StageError`]: a Stage Agent invocation failed. Either wraps a
//!   [`CapabilityError`] (retryable) or reports a template binding failure
//!   (fatal).
//! - [`ErrorRecord`]: the terminal, stage-attributed failure stored in
//!   [`WorkflowState::error`](crate::WorkflowState) and returned to callers.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::WorkflowPhase;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by stage errors to let the engine decide whether to re-invoke a
/// stage without failing the run.
///
/// - `Retryable` errors: transport failures, provider errors, rate limits,
///   empty or malformed responses.
/// - `NonRetryable` errors: template binding failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the run fails.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Capability errors
// ---------------------------------------------------------------------------

/// The external capabilities a stage may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Large-language-model text generation.
    TextGeneration,
    /// Web search.
    Search,
    /// Image generation.
    ImageGeneration,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::TextGeneration => "text generation",
            Capability::Search => "search",
            Capability::ImageGeneration => "image generation",
        };
        f.write_str(name)
    }
}

const MAX_ERROR_BODY_CHARS: usize = 300;

/// A failed call to an external capability.
///
/// Transport, authentication, rate-limit, and malformed-response failures are
/// all surfaced as this single type; the engine treats every one of them as
/// [`ErrorKind::ExternalCallFailed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{capability} call failed: {message}")]
pub struct CapabilityError {
    /// Which capability failed.
    pub capability: Capability,
    /// Provider- or transport-level description of the failure.
    pub message: String,
    /// Delay requested by the provider (e.g. from a `Retry-After` header).
    pub retry_after: Option<Duration>,
}

impl CapabilityError {
    /// Creates a [`CapabilityError`] with no retry hint.
    pub fn new(capability: Capability, message: impl Into<String>) -> Self {
        Self {
            capability,
            message: message.into(),
            retry_after: None,
        }
    }

    /// The capability returned an empty or whitespace-only payload.
    pub fn empty_response(capability: Capability) -> Self {
        Self::new(capability, "empty response")
    }

    /// A non-success HTTP response from a provider.
    ///
    /// `retry_after` is the raw `Retry-After` header value; only the
    /// delay-seconds form is honoured. The body is truncated so provider
    /// error pages do not flood the log.
    pub fn http_status(
        capability: Capability,
        status: u16,
        body: &str,
        retry_after: Option<&str>,
    ) -> Self {
        let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        Self {
            capability,
            message,
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }

    /// Attaches a provider-requested back-off.
    #[must_use]
    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Failure signal returned by a Stage Agent's `run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// An underlying capability call failed or returned an unusable response.
    #[error(transparent)]
    ExternalCallFailed(#[from] CapabilityError),

    /// A required upstream field was missing when binding the stage's template,
    /// or the template references a placeholder the stage does not supply.
    ///
    /// Indicates an ordering or configuration bug; never retried.
    #[error("template '{template}' could not be bound: {reason}")]
    TemplateBindingFailed {
        /// Name of the template being bound.
        template: String,
        /// What was missing or unknown.
        reason: String,
    },
}

impl StageError {
    /// Convenience constructor for a missing state field.
    pub fn missing_field(template: impl Into<String>, field: &str) -> Self {
        StageError::TemplateBindingFailed {
            template: template.into(),
            reason: format!("required field '{field}' is not populated"),
        }
    }

    /// Maps this error onto the run-level taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::ExternalCallFailed(_) => ErrorKind::ExternalCallFailed,
            StageError::TemplateBindingFailed { .. } => ErrorKind::TemplateBindingFailed,
        }
    }

    /// Whether the engine may re-invoke the stage after this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StageError::ExternalCallFailed(e) => RetryPolicy::Retryable {
                after: e.retry_after,
            },
            StageError::TemplateBindingFailed { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Classification of a terminal workflow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// An external call kept failing until the attempt budget ran out.
    ExternalCallFailed,
    /// A template could not be bound; a logic error, never retried.
    TemplateBindingFailed,
    /// The configured per-stage time budget elapsed.
    TimeoutExceeded,
    /// The configuration was rejected at engine construction.
    ConfigurationInvalid,
    /// The topic or target word count was rejected before any stage ran.
    InvalidInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ExternalCallFailed => "ExternalCallFailed",
            ErrorKind::TemplateBindingFailed => "TemplateBindingFailed",
            ErrorKind::TimeoutExceeded => "TimeoutExceeded",
            ErrorKind::ConfigurationInvalid => "ConfigurationInvalid",
            ErrorKind::InvalidInput => "InvalidInput",
        };
        f.write_str(name)
    }
}

fn stage_label(stage: &Option<WorkflowPhase>) -> String {
    match stage {
        Some(phase) => format!(" in {phase}"),
        None => String::new(),
    }
}

/// The structured, stage-attributed failure of a workflow run.
///
/// Stored in `WorkflowState::error` and returned by `run_workflow` so front
/// ends can render a precise message (kind + stage + attempt count).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}{} after {attempts} attempt(s): {message}", stage_label(.stage))]
pub struct ErrorRecord {
    /// Failure classification.
    pub kind: ErrorKind,
    /// The phase that failed. `None` for failures before any stage ran.
    pub stage: Option<WorkflowPhase>,
    /// Attempts made in the failing stage (zero before any stage ran).
    pub attempts: u32,
    /// Human-readable description of the final error.
    pub message: String,
}

impl ErrorRecord {
    /// A terminal stage failure.
    pub fn from_stage(stage: WorkflowPhase, attempts: u32, error: &StageError) -> Self {
        Self {
            kind: error.kind(),
            stage: Some(stage),
            attempts,
            message: error.to_string(),
        }
    }

    /// The stage's time budget elapsed before a successful attempt.
    pub fn timeout(stage: WorkflowPhase, attempts: u32, budget: Duration) -> Self {
        Self {
            kind: ErrorKind::TimeoutExceeded,
            stage: Some(stage),
            attempts,
            message: format!("stage did not complete within {}s", budget.as_secs()),
        }
    }

    /// The run inputs were rejected before any stage ran.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            stage: None,
            attempts: 0,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Reasons a workflow configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `retry_attempts` was negative.
    #[error("retry_attempts must be >= 0, got {0}")]
    NegativeRetryAttempts(i64),

    /// `retry_attempts` does not fit the attempt counter.
    #[error("retry_attempts is too large: {0}")]
    RetryAttemptsTooLarge(i64),

    /// `timeout_seconds` was set to zero or a negative value.
    #[error("timeout_seconds must be positive when set, got {0}")]
    NonPositiveTimeout(i64),

    /// `editor_style` does not name a known style.
    #[error("unknown editor style '{0}' (expected one of General, Emotional, Hilarious, Critical, Cantonese)")]
    UnknownEditorStyle(String),

    /// `image_failure_policy` does not name a known policy.
    #[error("unknown image failure policy '{0}' (expected 'retry' or 'skip')")]
    UnknownImageFailurePolicy(String),

    /// No instruction template is registered for a stage the engine needs.
    #[error("no prompt template is registered for {0}")]
    MissingTemplate(String),

    /// The supplied stage agents do not cover Research, Write, Edit in order.
    #[error("stage agents must implement Research, Write, Edit in that order, got {0}")]
    InvalidStageOrder(String),

    /// Image generation is enabled but no image generator was supplied.
    #[error("enable_image_generation is set but no image generator is configured")]
    ImageGeneratorMissing,
}

impl From<ConfigError> for ErrorRecord {
    fn from(e: ConfigError) -> Self {
        Self {
            kind: ErrorKind::ConfigurationInvalid,
            stage: None,
            attempts: 0,
            message: e.to_string(),
        }
    }
}
