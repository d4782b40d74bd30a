//! Writing stage: turns the research summary into a draft article.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    Capability, ChatMessage, Stage, StageError, StateDelta, TextGenerator, WorkflowConfig,
    WorkflowState,
};

use super::{non_empty, StageAgent};
use crate::templates::PromptTemplate;

pub const SYSTEM_PROMPT: &str = "You are an experienced feature writer. You write clear, \
well-structured articles that stay faithful to the research you are given.";

/// Produces the `draft`.
pub struct Writer {
    template: PromptTemplate,
    text: Arc<dyn TextGenerator>,
}

impl Writer {
    pub fn new(template: PromptTemplate, text: Arc<dyn TextGenerator>) -> Self {
        Self { template, text }
    }
}

#[async_trait]
impl StageAgent for Writer {
    fn stage(&self) -> Stage {
        Stage::Write
    }

    async fn run(
        &self,
        state: &WorkflowState,
        _config: &WorkflowConfig,
    ) -> Result<StateDelta, StageError> {
        let summary = state
            .research_summary()
            .ok_or_else(|| StageError::missing_field(self.template.name(), "research_summary"))?;
        let word_count = state.target_word_count().to_string();

        let prompt = self.template.bind(&[
            ("topic", state.topic().as_str()),
            ("research_summary", summary),
            ("word_count", &word_count),
        ])?;
        let draft = self
            .text
            .generate(SYSTEM_PROMPT, &[ChatMessage::user(prompt)])
            .await?;

        Ok(StateDelta::Draft {
            draft: non_empty(draft, Capability::TextGeneration)?,
        })
    }
}
