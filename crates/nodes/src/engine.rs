//! The workflow engine.
//!
//! Drives the fixed `Research → Write → Edit` sequence over a private
//! [`WorkflowState`], applying the per-stage retry and timeout policy from
//! [`WorkflowConfig`]:
//!
//! 1. Entering a stage starts its deadline (if `timeout_seconds` is set). The
//!    deadline covers every attempt of that stage, including back-off.
//! 2. A retryable failure is re-attempted until `retry_attempts + 1` attempts
//!    have been made. The wait before a retry is the larger of the provider's
//!    `Retry-After` hint and the configured back-off, never more than
//!    [`MAX_RETRY_BACKOFF`].
//! 3. A non-retryable failure, an exhausted budget, or an elapsed deadline
//!    fails the run. No later stage executes.
//! 4. A successful attempt's delta is merged into the state. Deltas from failed
//!    or abandoned attempts are dropped unseen, so partial output never
//!    reaches the state.
//!
//! Every attempt appends one [`StageLogEntry`], and the log is republished on
//! a [`watch`] channel so front ends can poll or stream progress.
//!
//! The engine is immutable once built; concurrent runs may share it.

use std::sync::Arc;

use pipeline::{
    ConfigError, ErrorRecord, ImageGenerator, RetryPolicy, SearchTool, StageLogEntry, StageOutcome,
    TextGenerator, Timestamp, Topic, WordCount, WorkflowConfig, WorkflowState, MAX_RETRY_BACKOFF,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info_span, warn, Instrument};

use crate::stages::{Editor, Researcher, StageAgent, Writer};
use crate::templates::{PromptTemplates, TemplateKey};

/// Emits at `info` when the run has logging enabled, otherwise at `debug`.
macro_rules! log_progress {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Publishes the stage log after every appended entry.
pub type StageLogSender = watch::Sender<Vec<StageLogEntry>>;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The external capabilities the stages are built on.
///
/// Handles are shared; the same set may back many engines and runs.
#[derive(Clone)]
pub struct Capabilities {
    pub text: Arc<dyn TextGenerator>,
    pub search: Option<Arc<dyn SearchTool>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
}

impl Capabilities {
    /// Text generation only: no search, no images.
    pub fn new(text: Arc<dyn TextGenerator>) -> Self {
        Self {
            text,
            search: None,
            images: None,
        }
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchTool>) -> Self {
        self.search = Some(search);
        self
    }

    #[must_use]
    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequences the stage agents under one validated configuration.
pub struct WorkflowEngine {
    config: WorkflowConfig,
    agents: Vec<Arc<dyn StageAgent>>,
}

impl WorkflowEngine {
    /// Builds the standard Researcher → Writer → Editor graph.
    ///
    /// Fails with `ConfigurationInvalid` if the configuration does not
    /// validate, a required template is missing from `templates`, or image
    /// generation is enabled without an image generator.
    pub fn new(
        capabilities: Capabilities,
        templates: &PromptTemplates,
        config: WorkflowConfig,
    ) -> Result<Self, ErrorRecord> {
        if config.enable_image_generation && capabilities.images.is_none() {
            return Err(ConfigError::ImageGeneratorMissing.into());
        }

        let template = |key: TemplateKey| {
            templates
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingTemplate(key.to_string()))
        };

        let agents: Vec<Arc<dyn StageAgent>> = vec![
            Arc::new(Researcher::new(
                template(TemplateKey::Researcher)?,
                capabilities.text.clone(),
                capabilities.search.clone(),
            )),
            Arc::new(Writer::new(
                template(TemplateKey::Writer)?,
                capabilities.text.clone(),
            )),
            Arc::new(Editor::new(
                template(TemplateKey::Editor(config.editor_style))?,
                capabilities.text,
                capabilities.images,
            )),
        ];

        Self::with_agents(config, agents)
    }

    /// Builds an engine over caller-supplied agents.
    ///
    /// `agents` must implement the stages in execution order.
    pub fn with_agents(
        config: WorkflowConfig,
        agents: Vec<Arc<dyn StageAgent>>,
    ) -> Result<Self, ErrorRecord> {
        config.validate()?;

        let order: Vec<_> = agents.iter().map(|a| a.stage()).collect();
        if order != pipeline::Stage::ALL {
            return Err(ConfigError::InvalidStageOrder(format!("{order:?}")).into());
        }

        Ok(Self { config, agents })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Runs the workflow and returns the completed state or the typed failure.
    pub async fn run(
        &self,
        topic: &str,
        target_word_count: u32,
    ) -> Result<WorkflowState, ErrorRecord> {
        self.execute(topic, target_word_count).await?.into_result()
    }

    /// Runs the workflow and returns the terminal state, failed or completed.
    ///
    /// Only invalid input is reported as `Err`, since no state exists yet.
    pub async fn execute(
        &self,
        topic: &str,
        target_word_count: u32,
    ) -> Result<WorkflowState, ErrorRecord> {
        let (progress, _) = watch::channel(Vec::new());
        self.execute_with_progress(topic, target_word_count, &progress)
            .await
    }

    /// Like [`execute`](Self::execute), publishing the stage log to `progress`
    /// after every attempt.
    pub async fn execute_with_progress(
        &self,
        topic: &str,
        target_word_count: u32,
        progress: &StageLogSender,
    ) -> Result<WorkflowState, ErrorRecord> {
        let topic = Topic::new(topic)
            .ok_or_else(|| ErrorRecord::invalid_input("topic must not be empty or whitespace"))?;
        let target_word_count = WordCount::new(target_word_count)
            .ok_or_else(|| ErrorRecord::invalid_input("target word count must be positive"))?;

        let mut state = WorkflowState::new(topic, target_word_count, self.config.editor_style);
        progress.send_replace(Vec::new());

        let span = info_span!(
            "workflow",
            run_id = %state.run_id(),
            topic = %state.topic(),
            words = state.target_word_count().as_u32(),
            style = %self.config.editor_style,
        );
        self.drive(&mut state, progress).instrument(span).await;
        Ok(state)
    }

    async fn drive(&self, state: &mut WorkflowState, progress: &StageLogSender) {
        let enabled = self.config.enable_logging;
        let started = Instant::now();
        log_progress!(
            enabled,
            retry_attempts = self.config.retry_attempts,
            timeout_seconds = ?self.config.timeout_seconds,
            images = self.config.enable_image_generation,
            "Starting workflow"
        );

        for agent in &self.agents {
            if let Err(record) = self.run_stage(agent.as_ref(), state, progress).await {
                error!(
                    kind = %record.kind,
                    stage = ?record.stage,
                    attempts = record.attempts,
                    message = %record.message,
                    "Workflow failed"
                );
                state.fail(record);
                return;
            }
        }

        if let Err(rejected) = state.complete() {
            state.fail(rejected.into());
            return;
        }
        log_progress!(
            enabled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            attempts = state.stage_log().len(),
            "Workflow completed"
        );
    }

    async fn run_stage(
        &self,
        agent: &dyn StageAgent,
        state: &mut WorkflowState,
        progress: &StageLogSender,
    ) -> Result<(), ErrorRecord> {
        let stage = agent.stage();
        let phase = stage.phase();
        state.enter(stage)?;

        let enabled = self.config.enable_logging;
        let budget = self.config.timeout();
        // A budget too large to represent as an instant means no deadline.
        let deadline = budget.and_then(|b| Instant::now().checked_add(b));
        let max_attempts = self.config.max_attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            log_progress!(enabled, %stage, attempt, max_attempts, "Stage attempt started");

            let started_at = Timestamp::now();
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, agent.run(state, &self.config))
                    .await
                    .ok(),
                None => Some(agent.run(state, &self.config).await),
            };
            let entry = |outcome| StageLogEntry {
                stage,
                started_at,
                finished_at: Timestamp::now(),
                attempt,
                outcome,
            };

            let err = match result {
                None => {
                    warn!(%stage, attempt, "Stage deadline elapsed; abandoning attempt");
                    record(state, progress, entry(StageOutcome::TimedOut));
                    return Err(ErrorRecord::timeout(phase, attempt, budget.unwrap_or_default()));
                }
                Some(Ok(delta)) => {
                    if let Err(rejected) = state.apply(delta) {
                        let mut failure = ErrorRecord::from(rejected);
                        failure.stage = Some(phase);
                        failure.attempts = attempt;
                        let outcome = StageOutcome::Failed {
                            kind: failure.kind,
                            message: failure.message.clone(),
                        };
                        record(state, progress, entry(outcome));
                        return Err(failure);
                    }
                    let done = entry(StageOutcome::Completed);
                    log_progress!(
                        enabled,
                        %stage,
                        attempt,
                        elapsed_ms = done.finished_at.millis_since(done.started_at),
                        "Stage completed"
                    );
                    record(state, progress, done);
                    return Ok(());
                }
                Some(Err(err)) => err,
            };

            let outcome = StageOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            };
            record(state, progress, entry(outcome));

            let after = match err.retry_policy() {
                RetryPolicy::Retryable { after } if attempt < max_attempts => after,
                _ => return Err(ErrorRecord::from_stage(phase, attempt, &err)),
            };
            warn!(%stage, attempt, max_attempts, error = %err, "Stage attempt failed; retrying");

            let delay = after
                .unwrap_or_default()
                .min(MAX_RETRY_BACKOFF)
                .max(self.config.backoff_before(attempt + 1));
            if delay.is_zero() {
                continue;
            }
            let Some(wake) = Instant::now().checked_add(delay) else {
                continue;
            };
            match deadline {
                Some(deadline) if wake >= deadline => {
                    tokio::time::sleep_until(deadline).await;
                    warn!(%stage, attempt, "Stage deadline elapsed while backing off");
                    return Err(ErrorRecord::timeout(phase, attempt, budget.unwrap_or_default()));
                }
                _ => tokio::time::sleep_until(wake).await,
            }
        }
    }
}

fn record(state: &mut WorkflowState, progress: &StageLogSender, entry: StageLogEntry) {
    state.record(entry);
    progress.send_replace(state.stage_log().to_vec());
}

/// Builds an engine for `config` and runs one workflow.
///
/// The single entry point for front ends that do not need progress updates.
pub async fn run_workflow(
    capabilities: Capabilities,
    templates: &PromptTemplates,
    topic: &str,
    target_word_count: u32,
    config: WorkflowConfig,
) -> Result<WorkflowState, ErrorRecord> {
    WorkflowEngine::new(capabilities, templates, config)?
        .run(topic, target_word_count)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hit, StubGenerator, StubImages, StubSearch};
    use async_trait::async_trait;
    use pipeline::{
        Capability, CapabilityError, EditorStyle, ErrorKind, Stage, StageError, StateDelta,
        WorkflowPhase,
    };
    use std::time::Duration;

    fn no_images() -> WorkflowConfig {
        WorkflowConfig {
            enable_image_generation: false,
            ..Default::default()
        }
    }

    fn engine(text: Arc<StubGenerator>, config: WorkflowConfig) -> WorkflowEngine {
        let mut caps = Capabilities::new(text);
        if config.enable_image_generation {
            caps = caps.with_images(Arc::new(StubImages::new()));
        }
        WorkflowEngine::new(caps, &PromptTemplates::builtin(), config).unwrap()
    }

    /// Success and failure are mutually exclusive.
    fn assert_consistent(state: &WorkflowState) {
        match state.error() {
            Some(_) => {
                assert_eq!(state.phase(), WorkflowPhase::Failed);
                assert!(state.final_article().is_none());
            }
            None => {
                assert_eq!(state.phase(), WorkflowPhase::Completed);
                assert!(!state.final_article().unwrap_or("").trim().is_empty());
            }
        }
    }

    fn stages(state: &WorkflowState) -> Vec<(Stage, u32, bool)> {
        state
            .stage_log()
            .iter()
            .map(|e| (e.stage, e.attempt, e.outcome.is_completed()))
            .collect()
    }

    #[tokio::test]
    async fn test_hilarious_scenario_with_stub_capabilities() {
        let text = Arc::new(
            StubGenerator::new()
                .respond(Stage::Research, "RESEARCH SUMMARY")
                .respond(Stage::Write, "DRAFT ARTICLE")
                .respond(Stage::Edit, "HILARIOUS FINAL ARTICLE"),
        );
        let search = Arc::new(StubSearch::new(vec![hit(
            "Inauguration details",
            "https://news.example/inauguration",
        )]));
        let config = WorkflowConfig {
            retry_attempts: 1,
            editor_style: EditorStyle::Hilarious,
            enable_image_generation: false,
            ..Default::default()
        };

        let state = run_workflow(
            Capabilities::new(text.clone()).with_search(search),
            &PromptTemplates::builtin(),
            "47th President",
            500,
            config,
        )
        .await
        .unwrap();

        assert_eq!(state.final_article(), Some("HILARIOUS FINAL ARTICLE"));
        assert!(state.images().is_empty());
        assert!(state.error().is_none());
        assert_eq!(state.editor_style(), EditorStyle::Hilarious);
        assert_eq!(
            stages(&state),
            vec![
                (Stage::Research, 1, true),
                (Stage::Write, 1, true),
                (Stage::Edit, 1, true)
            ]
        );

        // Each stage saw its predecessor's output.
        assert!(text
            .last_prompt(Stage::Research)
            .unwrap()
            .contains("https://news.example/inauguration"));
        assert!(text.last_prompt(Stage::Write).unwrap().contains("RESEARCH SUMMARY"));
        assert!(text.last_prompt(Stage::Edit).unwrap().contains("DRAFT ARTICLE"));
    }

    #[tokio::test]
    async fn test_successful_log_is_ordered_with_non_decreasing_timestamps() {
        let state = engine(Arc::new(StubGenerator::new()), no_images())
            .run("Rust", 300)
            .await
            .unwrap();

        assert_consistent(&state);
        let log = state.stage_log();
        assert!(log.len() >= 3);
        assert_eq!(
            log.iter().map(|e| e.stage).collect::<Vec<_>>(),
            Stage::ALL.to_vec()
        );
        for entry in log {
            assert!(entry.started_at <= entry.finished_at);
        }
        for pair in log.windows(2) {
            assert!(pair[0].finished_at <= pair[1].started_at);
        }
    }

    #[tokio::test]
    async fn test_no_retries_and_failing_generator_fails_in_research_after_one_attempt() {
        let text = Arc::new(StubGenerator::new().fail_always());
        let config = WorkflowConfig {
            retry_attempts: 0,
            ..no_images()
        };

        let state = engine(text.clone(), config)
            .execute("Rust", 300)
            .await
            .unwrap();

        assert_consistent(&state);
        let error = state.error().unwrap();
        assert_eq!(error.kind, ErrorKind::ExternalCallFailed);
        assert_eq!(error.stage, Some(WorkflowPhase::Researching));
        assert_eq!(error.attempts, 1);
        assert_eq!(text.calls(Stage::Research), 1);
        assert_eq!(text.calls(Stage::Write), 0);
        assert_eq!(stages(&state), vec![(Stage::Research, 1, false)]);
        assert!(state.research_summary().is_none());
    }

    #[tokio::test]
    async fn test_run_returns_typed_error_for_failed_run() {
        let config = WorkflowConfig {
            retry_attempts: 0,
            ..no_images()
        };
        let err = engine(Arc::new(StubGenerator::new().fail_always()), config)
            .run("Rust", 300)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ExternalCallFailed);
        assert_eq!(err.stage, Some(WorkflowPhase::Researching));
    }

    #[tokio::test]
    async fn test_retried_stage_produces_same_outputs_as_clean_run() {
        let config = WorkflowConfig {
            retry_attempts: 3,
            ..no_images()
        };
        let clean = engine(Arc::new(StubGenerator::new()), config)
            .run("Rust", 300)
            .await
            .unwrap();

        let flaky_text = Arc::new(StubGenerator::new().fail_times(Stage::Write, 2));
        let flaky = engine(flaky_text.clone(), config)
            .run("Rust", 300)
            .await
            .unwrap();

        assert_eq!(flaky.research_summary(), clean.research_summary());
        assert_eq!(flaky.draft(), clean.draft());
        assert_eq!(flaky.final_article(), clean.final_article());
        assert_eq!(flaky.images(), clean.images());
        assert_eq!(flaky_text.calls(Stage::Write), 3);
        assert_eq!(
            stages(&flaky),
            vec![
                (Stage::Research, 1, true),
                (Stage::Write, 1, false),
                (Stage::Write, 2, false),
                (Stage::Write, 3, true),
                (Stage::Edit, 1, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_exhausted_budget_keeps_earlier_outputs_and_stops() {
        let text = Arc::new(StubGenerator::new().fail_times(Stage::Write, 10));
        let config = WorkflowConfig {
            retry_attempts: 2,
            ..no_images()
        };

        let state = engine(text.clone(), config)
            .execute("Rust", 300)
            .await
            .unwrap();

        assert_consistent(&state);
        let error = state.error().unwrap();
        assert_eq!(error.stage, Some(WorkflowPhase::Writing));
        assert_eq!(error.attempts, 3);
        assert!(state.research_summary().is_some());
        assert!(state.draft().is_none());
        assert_eq!(text.calls(Stage::Edit), 0);
        assert_eq!(state.stage_log().len(), 4);
    }

    #[tokio::test]
    async fn test_images_empty_when_disabled_for_every_style() {
        for style in EditorStyle::ALL {
            let images = Arc::new(StubImages::new());
            let config = WorkflowConfig {
                editor_style: style,
                ..no_images()
            };
            let caps = Capabilities::new(Arc::new(StubGenerator::new())).with_images(images.clone());

            let state = run_workflow(caps, &PromptTemplates::builtin(), "Rust", 300, config)
                .await
                .unwrap();

            assert!(state.images().is_empty(), "{style}");
            assert!(images.prompts().is_empty(), "{style}");
        }
    }

    #[tokio::test]
    async fn test_images_attached_when_enabled() {
        let state = engine(Arc::new(StubGenerator::new()), WorkflowConfig::default())
            .run("Rust", 300)
            .await
            .unwrap();

        assert_eq!(state.images().len(), 1);
        assert_eq!(state.images()[0].asset.as_str(), "https://images.example/1.png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mid_stage_discards_in_flight_output() {
        let text = Arc::new(StubGenerator::new().delay(Stage::Write, Duration::from_secs(60)));
        let config = WorkflowConfig {
            timeout_seconds: Some(5),
            retry_attempts: 3,
            ..no_images()
        };

        let state = engine(text.clone(), config)
            .execute("Rust", 300)
            .await
            .unwrap();

        assert_consistent(&state);
        let error = state.error().unwrap();
        assert_eq!(error.kind, ErrorKind::TimeoutExceeded);
        assert_eq!(error.stage, Some(WorkflowPhase::Writing));
        assert_eq!(error.attempts, 1);
        assert!(state.draft().is_none());
        assert_eq!(
            state.stage_log().last().map(|e| &e.outcome),
            Some(&StageOutcome::TimedOut)
        );
        assert_eq!(text.calls(Stage::Edit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_regardless_of_remaining_retries() {
        let text = Arc::new(
            StubGenerator::new()
                .fail_times(Stage::Research, 100)
                .retry_after(Duration::from_secs(30)),
        );
        let config = WorkflowConfig {
            timeout_seconds: Some(10),
            retry_attempts: 50,
            ..no_images()
        };

        let state = engine(text.clone(), config)
            .execute("Rust", 300)
            .await
            .unwrap();

        let error = state.error().unwrap();
        assert_eq!(error.kind, ErrorKind::TimeoutExceeded);
        assert_eq!(error.stage, Some(WorkflowPhase::Researching));
        assert_eq!(text.calls(Stage::Research), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_provider_hint() {
        let text = Arc::new(
            StubGenerator::new()
                .fail_times(Stage::Research, 1)
                .retry_after(Duration::from_secs(7)),
        );
        let config = WorkflowConfig {
            retry_attempts: 1,
            ..no_images()
        };

        let started = Instant::now();
        let state = engine(text, config).run("Rust", 300).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(state.stage_log().len(), 4);
    }

    #[tokio::test]
    async fn test_template_binding_failure_is_not_retried() {
        let mut entries: Vec<(TemplateKey, String)> = TemplateKey::all()
            .map(|key| {
                let text = PromptTemplates::builtin().get(key).unwrap().text().to_string();
                (key, text)
            })
            .collect();
        for (key, text) in &mut entries {
            if *key == TemplateKey::Writer {
                *text = "Write about {topic} for {audience}".to_string();
            }
        }
        let templates = PromptTemplates::from_entries(entries);
        let text = Arc::new(StubGenerator::new());
        let config = WorkflowConfig {
            retry_attempts: 3,
            ..no_images()
        };

        let err = run_workflow(Capabilities::new(text.clone()), &templates, "Rust", 300, config)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::TemplateBindingFailed);
        assert_eq!(err.stage, Some(WorkflowPhase::Writing));
        assert_eq!(err.attempts, 1);
        assert_eq!(text.calls(Stage::Write), 0);
    }

    #[tokio::test]
    async fn test_search_failures_are_retried_like_generation_failures() {
        let search = Arc::new(StubSearch::failing(CapabilityError::new(
            Capability::Search,
            "quota exhausted",
        )));
        let config = WorkflowConfig {
            retry_attempts: 2,
            ..no_images()
        };
        let caps = Capabilities::new(Arc::new(StubGenerator::new())).with_search(search.clone());

        let err = run_workflow(caps, &PromptTemplates::builtin(), "Rust", 300, config)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ExternalCallFailed);
        assert_eq!(err.attempts, 3);
        assert!(err.message.contains("quota exhausted"));
        // Each attempt stops at the first failing query.
        assert_eq!(search.queries().len(), 3);
    }

    #[test]
    fn test_invalid_configurations_are_rejected_at_construction() {
        let text = || Arc::new(StubGenerator::new());

        let zero_timeout = WorkflowConfig {
            timeout_seconds: Some(0),
            ..no_images()
        };
        let err = WorkflowEngine::new(Capabilities::new(text()), &PromptTemplates::builtin(), zero_timeout)
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::ConfigurationInvalid);

        let err = WorkflowEngine::new(
            Capabilities::new(text()),
            &PromptTemplates::builtin(),
            WorkflowConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, ErrorKind::ConfigurationInvalid);
        assert!(err.message.contains("image generator"));

        let without_cantonese = PromptTemplates::from_entries(
            TemplateKey::all()
                .filter(|k| *k != TemplateKey::Editor(EditorStyle::Cantonese))
                .map(|k| (k, PromptTemplates::builtin().get(k).unwrap().text().to_string())),
        );
        let cantonese = WorkflowConfig {
            editor_style: EditorStyle::Cantonese,
            ..no_images()
        };
        let err = WorkflowEngine::new(Capabilities::new(text()), &without_cantonese, cantonese)
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::ConfigurationInvalid);
        assert!(err.message.contains("Cantonese"));
    }

    #[tokio::test]
    async fn test_invalid_input_fails_before_any_stage() {
        let text = Arc::new(StubGenerator::new());
        let engine = engine(text.clone(), no_images());

        let err = engine.run("   ", 300).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.stage, None);

        let err = engine.run("Rust", 0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);

        assert_eq!(text.calls(Stage::Research), 0);
    }

    #[tokio::test]
    async fn test_progress_channel_mirrors_stage_log() {
        let (tx, rx) = watch::channel(Vec::new());
        let state = engine(Arc::new(StubGenerator::new().fail_times(Stage::Edit, 1)), no_images())
            .execute_with_progress("Rust", 300, &tx)
            .await
            .unwrap();

        assert_eq!(rx.borrow().as_slice(), state.stage_log());
        assert_eq!(rx.borrow().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_updates_arrive_while_run_is_in_flight() {
        let text = Arc::new(
            StubGenerator::new()
                .delay(Stage::Write, Duration::from_secs(1))
                .delay(Stage::Edit, Duration::from_secs(1)),
        );
        let (tx, mut rx) = watch::channel(Vec::new());
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                seen.push(rx.borrow_and_update().len());
            }
            seen
        });

        let state = engine(text, no_images())
            .execute_with_progress("Rust", 300, &tx)
            .await
            .unwrap();
        drop(tx);
        let seen = watcher.await.unwrap();

        assert_eq!(state.stage_log().len(), 3);
        // Research and Write entries were observed before the run finished.
        assert!(seen.contains(&1), "{seen:?}");
        assert!(seen.contains(&2), "{seen:?}");
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_runs_without_deadline() {
        let config = WorkflowConfig {
            timeout_seconds: Some(i64::MAX as u64),
            ..no_images()
        };

        let state = engine(Arc::new(StubGenerator::new()), config)
            .run("Rust", 300)
            .await
            .unwrap();

        assert_consistent(&state);
        assert_eq!(state.stage_log().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_retry_hint_is_capped() {
        for hint in [Duration::from_secs(86_400), Duration::from_secs(u64::MAX / 2)] {
            let text = Arc::new(
                StubGenerator::new()
                    .fail_times(Stage::Research, 1)
                    .retry_after(hint),
            );
            let config = WorkflowConfig {
                retry_attempts: 1,
                ..no_images()
            };

            let started = Instant::now();
            let state = engine(text, config).run("Rust", 300).await.unwrap();
            let waited = started.elapsed();

            assert!(waited >= MAX_RETRY_BACKOFF, "{hint:?}: {waited:?}");
            assert!(waited < MAX_RETRY_BACKOFF + Duration::from_secs(1), "{hint:?}: {waited:?}");
            assert_eq!(state.stage_log().len(), 4);
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_engine_without_sharing_state() {
        let text = Arc::new(StubGenerator::new());
        let engine = engine(text.clone(), no_images());

        let (a, b) = tokio::join!(engine.run("Rust", 300), engine.run("Go", 800));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.topic().as_str(), "Rust");
        assert_eq!(b.topic().as_str(), "Go");
        assert_eq!(b.target_word_count().as_u32(), 800);
        assert_eq!(a.stage_log().len(), 3);
        assert_eq!(b.stage_log().len(), 3);
        assert_eq!(text.calls(Stage::Research), 2);
    }

    /// Returns the writer's delta while claiming to be the editor.
    struct MisroutedEditor;

    #[async_trait]
    impl StageAgent for MisroutedEditor {
        fn stage(&self) -> Stage {
            Stage::Edit
        }

        async fn run(
            &self,
            _state: &WorkflowState,
            _config: &WorkflowConfig,
        ) -> Result<StateDelta, StageError> {
            Ok(StateDelta::Draft {
                draft: "overwrite".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_delta_for_another_stage_is_rejected_and_not_retried() {
        let text: Arc<dyn TextGenerator> = Arc::new(StubGenerator::new());
        let templates = PromptTemplates::builtin();
        let agents: Vec<Arc<dyn StageAgent>> = vec![
            Arc::new(Researcher::new(
                templates.get(TemplateKey::Researcher).cloned().unwrap(),
                text.clone(),
                None,
            )),
            Arc::new(Writer::new(
                templates.get(TemplateKey::Writer).cloned().unwrap(),
                text,
            )),
            Arc::new(MisroutedEditor),
        ];
        let engine = WorkflowEngine::with_agents(no_images(), agents).unwrap();

        let state = engine.execute("Rust", 300).await.unwrap();

        assert_consistent(&state);
        let error = state.error().unwrap();
        assert_eq!(error.kind, ErrorKind::TemplateBindingFailed);
        assert_eq!(error.stage, Some(WorkflowPhase::Editing));
        assert_eq!(error.attempts, 1);
        assert_eq!(state.draft(), Some("Write output"));
    }

    #[test]
    fn test_agents_out_of_order_are_rejected() {
        let agents: Vec<Arc<dyn StageAgent>> = vec![Arc::new(MisroutedEditor)];
        let err = WorkflowEngine::with_agents(no_images(), agents).err().unwrap();
        assert_eq!(err.kind, ErrorKind::ConfigurationInvalid);
    }
}
