//! Prompt template store.
//!
//! Instruction templates are immutable configuration data: an enum-keyed table
//! built once at process start from the built-in texts (embedded at compile
//! time) and, optionally, override files read from a directory. Nothing
//! mutates the table after construction; stages clone the templates they need.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal braces;
//! any other brace sequence is kept verbatim.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use pipeline::{EditorStyle, StageError};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Identifies one template in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    Researcher,
    Writer,
    Editor(EditorStyle),
}

impl TemplateKey {
    /// Every key the store is expected to hold.
    pub fn all() -> impl Iterator<Item = TemplateKey> {
        [TemplateKey::Researcher, TemplateKey::Writer]
            .into_iter()
            .chain(EditorStyle::ALL.into_iter().map(TemplateKey::Editor))
    }

    /// File name used for overrides, e.g. `editor_hilarious.txt`.
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKey::Researcher => "researcher.txt",
            TemplateKey::Writer => "writer.txt",
            TemplateKey::Editor(EditorStyle::General) => "editor.txt",
            TemplateKey::Editor(EditorStyle::Emotional) => "editor_emotional.txt",
            TemplateKey::Editor(EditorStyle::Hilarious) => "editor_hilarious.txt",
            TemplateKey::Editor(EditorStyle::Critical) => "editor_critical.txt",
            TemplateKey::Editor(EditorStyle::Cantonese) => "editor_cantonese.txt",
        }
    }

    /// Placeholders the owning stage supplies when binding this template.
    pub fn allowed_placeholders(self) -> &'static [&'static str] {
        match self {
            TemplateKey::Researcher => &["topic", "search_results"],
            TemplateKey::Writer => &["topic", "research_summary", "word_count"],
            TemplateKey::Editor(_) => &["topic", "article_draft"],
        }
    }

    fn builtin_text(self) -> &'static str {
        match self {
            TemplateKey::Researcher => include_str!("../prompts/researcher.txt"),
            TemplateKey::Writer => include_str!("../prompts/writer.txt"),
            TemplateKey::Editor(EditorStyle::General) => include_str!("../prompts/editor.txt"),
            TemplateKey::Editor(EditorStyle::Emotional) => {
                include_str!("../prompts/editor_emotional.txt")
            }
            TemplateKey::Editor(EditorStyle::Hilarious) => {
                include_str!("../prompts/editor_hilarious.txt")
            }
            TemplateKey::Editor(EditorStyle::Critical) => {
                include_str!("../prompts/editor_critical.txt")
            }
            TemplateKey::Editor(EditorStyle::Cantonese) => {
                include_str!("../prompts/editor_cantonese.txt")
            }
        }
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateKey::Researcher => f.write_str("researcher"),
            TemplateKey::Writer => f.write_str("writer"),
            TemplateKey::Editor(style) => write!(f, "editor/{style}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `text` into literal and placeholder segments.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let segments = parse_segments(&text);
        Self {
            name: name.into(),
            text,
            segments,
        }
    }

    /// Name used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholder names referenced by the template.
    pub fn placeholders(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Substitutes every placeholder with its value from `values`.
    ///
    /// Fails with [`StageError::TemplateBindingFailed`] if the template refers
    /// to a placeholder that `values` does not supply.
    pub fn bind(&self, values: &[(&str, &str)]) -> Result<String, StageError> {
        let mut out = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = values
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| StageError::TemplateBindingFailed {
                            template: self.name.clone(),
                            reason: format!("no value for placeholder '{{{name}}}'"),
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("{{") {
            literal.push('{');
            rest = &rest[2..];
            continue;
        }
        if rest.starts_with("}}") {
            literal.push('}');
            rest = &rest[2..];
            continue;
        }
        if c == '{' {
            let inner = &rest[1..];
            let name_len = inner
                .char_indices()
                .find(|(_, ch)| !is_placeholder_char(*ch))
                .map_or(inner.len(), |(i, _)| i);
            if name_len > 0 && inner[name_len..].starts_with('}') {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(inner[..name_len].to_string()));
                rest = &inner[name_len + 1..];
                continue;
            }
        }
        literal.push(c);
        rest = &rest[c.len_utf8()..];
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Failure to load template overrides.
#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error("template directory {0} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {key} uses unknown placeholder '{{{placeholder}}}' (allowed: {allowed})")]
    UnknownPlaceholder {
        key: TemplateKey,
        placeholder: String,
        allowed: String,
    },
}

/// Immutable enum-keyed table of instruction templates.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<TemplateKey, PromptTemplate>,
}

impl PromptTemplates {
    /// The templates compiled into the binary.
    pub fn builtin() -> Self {
        let templates = TemplateKey::all()
            .map(|key| (key, PromptTemplate::new(key.to_string(), key.builtin_text())))
            .collect();
        Self { templates }
    }

    /// A store holding only `entries`. Keys that are absent have no template.
    pub fn from_entries(entries: impl IntoIterator<Item = (TemplateKey, String)>) -> Self {
        let templates = entries
            .into_iter()
            .map(|(key, text)| (key, PromptTemplate::new(key.to_string(), text)))
            .collect();
        Self { templates }
    }

    /// The built-in templates, overridden by any matching files in `dir`.
    ///
    /// Files are matched by [`TemplateKey::file_name`]; missing files keep the
    /// built-in text. Overrides may only use the placeholders their stage
    /// supplies.
    pub fn with_overrides_from(dir: &Path) -> Result<Self, TemplateLoadError> {
        if !dir.is_dir() {
            return Err(TemplateLoadError::NotADirectory(dir.to_path_buf()));
        }

        let mut store = Self::builtin();
        for key in TemplateKey::all() {
            let path = dir.join(key.file_name());
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|source| TemplateLoadError::Io {
                path: path.clone(),
                source,
            })?;
            let template = PromptTemplate::new(key.to_string(), text);
            check_placeholders(key, &template)?;

            tracing::info!(template = %key, path = %path.display(), "Loaded prompt template override");
            store.templates.insert(key, template);
        }
        Ok(store)
    }

    /// Looks up a template.
    pub fn get(&self, key: TemplateKey) -> Option<&PromptTemplate> {
        self.templates.get(&key)
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

fn check_placeholders(key: TemplateKey, template: &PromptTemplate) -> Result<(), TemplateLoadError> {
    let allowed = key.allowed_placeholders();
    match template
        .placeholders()
        .into_iter()
        .find(|p| !allowed.iter().any(|a| a == p))
    {
        Some(unknown) => Err(TemplateLoadError::UnknownPlaceholder {
            key,
            placeholder: unknown.to_string(),
            allowed: allowed.join(", "),
        }),
        None => Ok(()),
    }
}
