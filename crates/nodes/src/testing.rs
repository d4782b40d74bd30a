//! Stub capabilities shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    AssetReference, Capability, CapabilityError, ChatMessage, EditorStyle, ImageGenerator,
    ImageReference, SearchHit, SearchTool, SourceReference, Stage, StateDelta, TextGenerator,
    Topic, WordCount, WorkflowState,
};

use crate::stages::system_prompt;

fn stage_of(system: &str) -> Stage {
    Stage::ALL
        .into_iter()
        .find(|stage| system_prompt(*stage) == system)
        .unwrap_or_else(|| panic!("unrecognised system prompt: {system}"))
}

/// Text generator that answers per stage, recognising the stage by its
/// system prompt.
#[derive(Default)]
pub(crate) struct StubGenerator {
    responses: HashMap<Stage, String>,
    delays: HashMap<Stage, Duration>,
    retry_after: Option<Duration>,
    remaining_failures: Mutex<HashMap<Stage, u32>>,
    prompts: Mutex<Vec<(Stage, String)>>,
}

impl StubGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, stage: Stage, text: &str) -> Self {
        self.responses.insert(stage, text.to_string());
        self
    }

    /// Fails the next `times` calls for `stage`.
    pub(crate) fn fail_times(self, stage: Stage, times: u32) -> Self {
        self.remaining_failures
            .lock()
            .unwrap()
            .insert(stage, times);
        self
    }

    /// Fails every call for every stage.
    pub(crate) fn fail_always(self) -> Self {
        Stage::ALL
            .into_iter()
            .fold(self, |stub, stage| stub.fail_times(stage, u32::MAX))
    }

    pub(crate) fn delay(mut self, stage: Stage, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    /// Attaches a `Retry-After` hint to every failure.
    pub(crate) fn retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    pub(crate) fn calls(&self, stage: Stage) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .count()
    }

    pub(crate) fn last_prompt(&self, stage: Stage) -> Option<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<String, CapabilityError> {
        let stage = stage_of(system_prompt);
        let prompt = history.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push((stage, prompt));

        if let Some(delay) = self.delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }

        let fail = {
            let mut remaining = self.remaining_failures.lock().unwrap();
            match remaining.get_mut(&stage) {
                Some(n) if *n > 0 => {
                    *n = n.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };
        if fail {
            let err = CapabilityError::new(Capability::TextGeneration, format!("{stage} unavailable"));
            return Err(match self.retry_after {
                Some(after) => err.with_retry_after(after),
                None => err,
            });
        }

        Ok(self
            .responses
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| format!("{stage} output")))
    }
}

/// Search tool returning a fixed result list.
pub(crate) struct StubSearch {
    results: Vec<SearchHit>,
    failure: Option<CapabilityError>,
    queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub(crate) fn new(results: Vec<SearchHit>) -> Self {
        Self {
            results,
            failure: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: CapabilityError) -> Self {
        Self {
            results: Vec::new(),
            failure: Some(error),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchTool for StubSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        self.queries.lock().unwrap().push(query.to_string());
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.results.iter().take(max_results).cloned().collect()),
        }
    }
}

/// Image generator returning numbered placeholder URLs.
pub(crate) struct StubImages {
    failure: Option<CapabilityError>,
    prompts: Mutex<Vec<String>>,
}

impl StubImages {
    pub(crate) fn new() -> Self {
        Self {
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: CapabilityError) -> Self {
        Self {
            failure: Some(error),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for StubImages {
    async fn generate_image(&self, prompt: &str) -> Result<ImageReference, CapabilityError> {
        let n = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(ImageReference {
            asset: AssetReference::new(format!("https://images.example/{n}.png")).unwrap(),
            prompt: prompt.to_string(),
            style: "photorealistic".to_string(),
        })
    }
}

pub(crate) fn hit(snippet: &str, source: &str) -> SearchHit {
    SearchHit {
        title: None,
        snippet: snippet.to_string(),
        source: SourceReference::new(source).unwrap(),
    }
}

/// A fresh 500-word state for `topic`.
pub(crate) fn state(topic: &str) -> WorkflowState {
    WorkflowState::new(
        Topic::new(topic).unwrap(),
        WordCount::new(500).unwrap(),
        EditorStyle::General,
    )
}

pub(crate) fn state_after_research(topic: &str, summary: &str) -> WorkflowState {
    let mut s = state(topic);
    s.enter(Stage::Research).unwrap();
    s.apply(StateDelta::Research {
        research_summary: summary.to_string(),
    })
    .unwrap();
    s
}

pub(crate) fn state_after_draft(topic: &str, draft: &str) -> WorkflowState {
    let mut s = state_after_research(topic, "summary");
    s.enter(Stage::Write).unwrap();
    s.apply(StateDelta::Draft {
        draft: draft.to_string(),
    })
    .unwrap();
    s
}
