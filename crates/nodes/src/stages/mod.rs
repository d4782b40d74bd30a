//! Stage agents.
//!
//! Each agent binds its role's instruction template to the shared
//! text-generation capability and returns a [`StateDelta`] holding exactly
//! its own output fields. Agents keep no memory between invocations; all
//! continuity flows through [`WorkflowState`].

mod editor;
mod researcher;
mod writer;

pub use editor::{Editor, DEFAULT_IMAGE_STYLE};
pub use researcher::{Researcher, DEFAULT_MAX_RESULTS_PER_QUERY, DEFAULT_SEARCH_QUERIES};
pub use writer::Writer;

use async_trait::async_trait;
use pipeline::{Capability, CapabilityError, Stage, StageError, StateDelta, WorkflowConfig, WorkflowState};

/// The polymorphic stage interface driven by the engine.
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// Which stage this agent implements.
    fn stage(&self) -> Stage;

    /// Computes this stage's delta from the current state.
    ///
    /// Must not retain `state` beyond the call.
    async fn run(
        &self,
        state: &WorkflowState,
        config: &WorkflowConfig,
    ) -> Result<StateDelta, StageError>;
}

/// The system prompt each stage sends alongside its bound template.
pub fn system_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::Research => researcher::SYSTEM_PROMPT,
        Stage::Write => writer::SYSTEM_PROMPT,
        Stage::Edit => editor::SYSTEM_PROMPT,
    }
}

/// Rejects blank model output; an empty response counts as a failed call.
pub(crate) fn non_empty(text: String, capability: Capability) -> Result<String, StageError> {
    if text.trim().is_empty() {
        Err(CapabilityError::empty_response(capability).into())
    } else {
        Ok(text)
    }
}
