//! The workflow state machine and the record threaded through every stage.
//!
//! [`WorkflowState`] is owned by the engine for the whole run. Stages read it
//! through shared references and return a [`StateDelta`]; only the engine
//! writes to it, via [`WorkflowState::apply`], [`WorkflowState::record`] and
//! the phase transition methods.
//!
//! Write-once discipline is enforced here rather than trusted to callers: a
//! delta that would overwrite a populated output field, or that arrives
//! while the state is in the wrong phase, is rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EditorStyle, ErrorKind, ErrorRecord, ImageReference, RunId, Timestamp, Topic, WordCount};

// ---------------------------------------------------------------------------
// Stages and phases
// ---------------------------------------------------------------------------

/// One of the three units of work in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Research,
    Write,
    Edit,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 3] = [Stage::Research, Stage::Write, Stage::Edit];

    /// The engine phase in which this stage runs.
    pub fn phase(self) -> WorkflowPhase {
        match self {
            Stage::Research => WorkflowPhase::Researching,
            Stage::Write => WorkflowPhase::Writing,
            Stage::Edit => WorkflowPhase::Editing,
        }
    }

    /// The stage name as shown in logs and progress output.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Research => "Research",
            Stage::Write => "Write",
            Stage::Edit => "Edit",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the workflow engine.
///
/// `Initialized → Researching → Writing → Editing → Completed`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowPhase {
    Initialized,
    Researching,
    Writing,
    Editing,
    Completed,
    Failed,
}

impl WorkflowPhase {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowPhase::Completed | WorkflowPhase::Failed)
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkflowPhase::Initialized => "Initialized",
            WorkflowPhase::Researching => "Researching",
            WorkflowPhase::Writing => "Writing",
            WorkflowPhase::Editing => "Editing",
            WorkflowPhase::Completed => "Completed",
            WorkflowPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Stage log
// ---------------------------------------------------------------------------

/// How a single stage attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The attempt produced a delta that was merged into the state.
    Completed,
    /// The attempt returned an error.
    Failed {
        kind: ErrorKind,
        message: String,
    },
    /// The stage deadline elapsed while the attempt was in flight.
    TimedOut,
}

impl StageOutcome {
    /// Returns `true` for [`StageOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed)
    }
}

/// One stage invocation, as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: Stage,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub outcome: StageOutcome,
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// The output fields produced by one successful stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateDelta {
    /// Produced by the Researcher.
    Research { research_summary: String },
    /// Produced by the Writer.
    Draft { draft: String },
    /// Produced by the Editor.
    Edit {
        final_article: String,
        images: Vec<ImageReference>,
    },
}

impl StateDelta {
    /// The stage that owns this delta's fields.
    pub fn stage(&self) -> Stage {
        match self {
            StateDelta::Research { .. } => Stage::Research,
            StateDelta::Draft { .. } => Stage::Write,
            StateDelta::Edit { .. } => Stage::Edit,
        }
    }
}

/// A delta that would break the state's write-once or ordering invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} delta rejected: {reason}")]
pub struct DeltaRejected {
    pub stage: Stage,
    pub reason: String,
}

impl From<DeltaRejected> for ErrorRecord {
    fn from(e: DeltaRejected) -> Self {
        Self {
            kind: ErrorKind::TemplateBindingFailed,
            stage: Some(e.stage.phase()),
            attempts: 0,
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// The single mutable record of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    run_id: RunId,
    topic: Topic,
    target_word_count: WordCount,
    editor_style: EditorStyle,
    phase: WorkflowPhase,
    research_summary: Option<String>,
    draft: Option<String>,
    final_article: Option<String>,
    images: Vec<ImageReference>,
    error: Option<ErrorRecord>,
    stage_log: Vec<StageLogEntry>,
}

impl WorkflowState {
    /// Creates the state of a fresh run in [`WorkflowPhase::Initialized`].
    pub fn new(topic: Topic, target_word_count: WordCount, editor_style: EditorStyle) -> Self {
        Self {
            run_id: RunId::new_random(),
            topic,
            target_word_count,
            editor_style,
            phase: WorkflowPhase::Initialized,
            research_summary: None,
            draft: None,
            final_article: None,
            images: Vec::new(),
            error: None,
            stage_log: Vec::new(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn target_word_count(&self) -> WordCount {
        self.target_word_count
    }

    pub fn editor_style(&self) -> EditorStyle {
        self.editor_style
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn research_summary(&self) -> Option<&str> {
        self.research_summary.as_deref()
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn final_article(&self) -> Option<&str> {
        self.final_article.as_deref()
    }

    pub fn images(&self) -> &[ImageReference] {
        &self.images
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn stage_log(&self) -> &[StageLogEntry] {
        &self.stage_log
    }

    /// Moves the state machine into the phase that runs `stage`.
    ///
    /// Fails if the state is terminal or if `stage` is not the next stage in
    /// the fixed order.
    pub fn enter(&mut self, stage: Stage) -> Result<(), DeltaRejected> {
        let expected = match self.phase {
            WorkflowPhase::Initialized => Some(Stage::Research),
            WorkflowPhase::Researching if self.research_summary.is_some() => Some(Stage::Write),
            WorkflowPhase::Writing if self.draft.is_some() => Some(Stage::Edit),
            _ => None,
        };
        if expected != Some(stage) {
            return Err(DeltaRejected {
                stage,
                reason: format!("cannot enter {} from {}", stage.phase(), self.phase),
            });
        }
        self.phase = stage.phase();
        Ok(())
    }

    /// Appends an entry to the stage log.
    pub fn record(&mut self, entry: StageLogEntry) {
        self.stage_log.push(entry);
    }

    /// Merges a stage's output into the state.
    ///
    /// The delta must belong to the current phase and must not overwrite a
    /// populated field. A rejected delta leaves the state untouched.
    pub fn apply(&mut self, delta: StateDelta) -> Result<(), DeltaRejected> {
        let stage = delta.stage();
        if self.phase != stage.phase() {
            return Err(DeltaRejected {
                stage,
                reason: format!("state is in phase {}", self.phase),
            });
        }

        let reject = |field: &str| DeltaRejected {
            stage,
            reason: format!("field '{field}' is already populated"),
        };

        match delta {
            StateDelta::Research { research_summary } => {
                if self.research_summary.is_some() {
                    return Err(reject("research_summary"));
                }
                self.research_summary = Some(research_summary);
            }
            StateDelta::Draft { draft } => {
                if self.draft.is_some() {
                    return Err(reject("draft"));
                }
                self.draft = Some(draft);
            }
            StateDelta::Edit {
                final_article,
                images,
            } => {
                if self.final_article.is_some() {
                    return Err(reject("final_article"));
                }
                if final_article.trim().is_empty() {
                    return Err(DeltaRejected {
                        stage,
                        reason: "final_article is empty".to_string(),
                    });
                }
                self.final_article = Some(final_article);
                self.images.extend(images);
            }
        }
        Ok(())
    }

    /// Marks the run as successfully finished.
    ///
    /// Requires the Editor's delta to have been applied.
    pub fn complete(&mut self) -> Result<(), DeltaRejected> {
        if self.phase != WorkflowPhase::Editing || self.final_article.is_none() {
            return Err(DeltaRejected {
                stage: Stage::Edit,
                reason: format!("cannot complete from {}", self.phase),
            });
        }
        self.phase = WorkflowPhase::Completed;
        Ok(())
    }

    /// Marks the run as failed. The first recorded error wins.
    pub fn fail(&mut self, error: ErrorRecord) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.phase = WorkflowPhase::Failed;
    }

    /// Converts a finished run into the caller-facing result.
    ///
    /// A state that has neither completed nor failed is reported as an error;
    /// a partial article is never returned as success.
    pub fn into_result(self) -> Result<WorkflowState, ErrorRecord> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.phase {
            WorkflowPhase::Completed => Ok(self),
            phase => Err(ErrorRecord {
                kind: ErrorKind::TemplateBindingFailed,
                stage: Some(phase),
                attempts: 0,
                message: "run did not reach a terminal phase".to_string(),
            }),
        }
    }
}
