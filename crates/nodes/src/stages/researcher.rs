//! Research stage: gathers source material and summarises it.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    Capability, ChatMessage, SearchHit, SearchTool, Stage, StageError, StateDelta, TextGenerator,
    WorkflowConfig, WorkflowState,
};
use tracing::debug;

use super::{non_empty, StageAgent};
use crate::templates::PromptTemplate;

pub const SYSTEM_PROMPT: &str = "You are a meticulous research analyst. You separate verified facts \
from speculation and always cite where information came from.";

/// Search queries issued for every run; `{topic}` is the only placeholder.
pub const DEFAULT_SEARCH_QUERIES: [&str; 3] = [
    "{topic}",
    "{topic} latest developments",
    "{topic} controversy and debate",
];

pub const DEFAULT_MAX_RESULTS_PER_QUERY: usize = 5;

/// Produces the `research_summary`.
pub struct Researcher {
    template: PromptTemplate,
    text: Arc<dyn TextGenerator>,
    search: Option<Arc<dyn SearchTool>>,
    queries: Vec<PromptTemplate>,
    max_results_per_query: usize,
}

impl Researcher {
    pub fn new(
        template: PromptTemplate,
        text: Arc<dyn TextGenerator>,
        search: Option<Arc<dyn SearchTool>>,
    ) -> Self {
        Self {
            template,
            text,
            search,
            queries: DEFAULT_SEARCH_QUERIES
                .iter()
                .enumerate()
                .map(|(i, q)| PromptTemplate::new(format!("search query {}", i + 1), *q))
                .collect(),
            max_results_per_query: DEFAULT_MAX_RESULTS_PER_QUERY,
        }
    }

    /// Replaces the default search queries.
    #[must_use]
    pub fn with_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queries = queries
            .into_iter()
            .enumerate()
            .map(|(i, q)| PromptTemplate::new(format!("search query {}", i + 1), q))
            .collect();
        self
    }

    #[must_use]
    pub fn with_max_results_per_query(mut self, max: usize) -> Self {
        self.max_results_per_query = max;
        self
    }

    async fn gather_sources(&self, topic: &str) -> Result<Vec<SearchHit>, StageError> {
        let Some(search) = &self.search else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for query in &self.queries {
            let query = query.bind(&[("topic", topic)])?;
            let results = search.search(&query, self.max_results_per_query).await?;
            debug!(query = %query, results = results.len(), "Search completed");

            for hit in results {
                if seen.insert(hit.source.clone()) {
                    hits.push(hit);
                }
            }
        }
        Ok(hits)
    }
}

/// Renders search hits as a numbered source list for the prompt.
pub(crate) fn format_sources(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "(no external sources were retrieved; rely on well-established knowledge and flag uncertainty)"
            .to_string();
    }

    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "[{}] ", i + 1);
        if let Some(title) = &hit.title {
            let _ = write!(out, "{title}: ");
        }
        let _ = write!(out, "{} (source: {})", hit.snippet.trim(), hit.source);
    }
    out
}

#[async_trait]
impl StageAgent for Researcher {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn run(
        &self,
        state: &WorkflowState,
        _config: &WorkflowConfig,
    ) -> Result<StateDelta, StageError> {
        let topic = state.topic().as_str();
        let sources = format_sources(&self.gather_sources(topic).await?);

        let prompt = self
            .template
            .bind(&[("topic", topic), ("search_results", &sources)])?;
        let summary = self
            .text
            .generate(SYSTEM_PROMPT, &[ChatMessage::user(prompt)])
            .await?;

        Ok(StateDelta::Research {
            research_summary: non_empty(summary, Capability::TextGeneration)?,
        })
    }
}
