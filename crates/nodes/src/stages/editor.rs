//! Editing stage: restyles the draft and optionally illustrates it.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    Capability, ChatMessage, ImageFailurePolicy, ImageGenerator, ImageReference, Stage, StageError,
    StateDelta, TextGenerator, WorkflowConfig, WorkflowState,
};
use tracing::warn;

use super::{non_empty, StageAgent};
use crate::templates::PromptTemplate;

pub const SYSTEM_PROMPT: &str = "You are a senior editor. You change an article's voice and \
structure completely while preserving every fact it contains.";

/// Visual style requested from the image generator.
pub const DEFAULT_IMAGE_STYLE: &str = "photorealistic";

const IMAGE_LEAD_CHARS: usize = 400;

/// Produces `final_article` and, when enabled, `images`.
pub struct Editor {
    template: PromptTemplate,
    text: Arc<dyn TextGenerator>,
    images: Option<Arc<dyn ImageGenerator>>,
}

impl Editor {
    /// `template` must be the one registered for the configured editor style.
    pub fn new(
        template: PromptTemplate,
        text: Arc<dyn TextGenerator>,
        images: Option<Arc<dyn ImageGenerator>>,
    ) -> Self {
        Self {
            template,
            text,
            images,
        }
    }

    async fn illustrate(
        &self,
        topic: &str,
        article: &str,
        config: &WorkflowConfig,
    ) -> Result<Vec<ImageReference>, StageError> {
        if !config.enable_image_generation {
            return Ok(Vec::new());
        }
        let Some(images) = &self.images else {
            return Ok(Vec::new());
        };

        let prompt = image_prompt(topic, article);
        match images.generate_image(&prompt).await {
            Ok(image) => Ok(vec![image]),
            Err(e) if config.image_failure_policy == ImageFailurePolicy::Skip => {
                warn!(error = %e, "Image generation failed; finishing without an image");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the image prompt from the topic and the article's lead paragraph.
pub(crate) fn image_prompt(topic: &str, article: &str) -> String {
    let lead = article
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or("");
    let lead: String = lead.chars().take(IMAGE_LEAD_CHARS).collect();

    if lead.is_empty() {
        format!("Editorial illustration for an article about {topic}")
    } else {
        format!("Editorial illustration for an article about {topic}. Scene: {lead}")
    }
}

#[async_trait]
impl StageAgent for Editor {
    fn stage(&self) -> Stage {
        Stage::Edit
    }

    async fn run(
        &self,
        state: &WorkflowState,
        config: &WorkflowConfig,
    ) -> Result<StateDelta, StageError> {
        let draft = state
            .draft()
            .ok_or_else(|| StageError::missing_field(self.template.name(), "article_draft"))?;
        let topic = state.topic().as_str();

        let prompt = self
            .template
            .bind(&[("topic", topic), ("article_draft", draft)])?;
        let article = self
            .text
            .generate(SYSTEM_PROMPT, &[ChatMessage::user(prompt)])
            .await?;
        let final_article = non_empty(article, Capability::TextGeneration)?;

        let images = self.illustrate(topic, &final_article, config).await?;

        Ok(StateDelta::Edit {
            final_article,
            images,
        })
    }
}
