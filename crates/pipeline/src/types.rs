//! Shared value types for the Inkwell workflow domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. word counts are strictly positive)
//! or bundle the payloads exchanged with external capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AssetReference, SourceReference};

// ---------------------------------------------------------------------------
// Article sizing
// ---------------------------------------------------------------------------

/// Target length of the generated article, in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordCount(u32);

impl WordCount {
    /// Creates a [`WordCount`], returning `None` if `count` is zero.
    #[must_use]
    pub fn new(count: u32) -> Option<Self> {
        if count == 0 {
            None
        } else {
            Some(Self(count))
        }
    }

    /// Returns the underlying integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for WordCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Author of a [`ChatMessage`] within a conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Input authored by the workflow on the user's behalf.
    User,
    /// Output previously produced by the model.
    Assistant,
}

/// One turn of the conversation history passed to a text generator.
///
/// The system prompt is carried separately; see
/// [`TextGenerator::generate`](crate::ports::TextGenerator::generate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored this turn.
    pub role: ChatRole,
    /// Plain-text content of the turn.
    pub content: String,
}

impl ChatMessage {
    /// Creates a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool outputs
// ---------------------------------------------------------------------------

/// A single result returned by a search capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Page title, when the provider returns one.
    pub title: Option<String>,
    /// Extract of the source relevant to the query.
    pub snippet: String,
    /// Where the snippet came from.
    pub source: SourceReference,
}

/// A generated image attached to the final article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// URL or provider handle of the generated asset.
    pub asset: AssetReference,
    /// The prompt the image was generated from (before style enhancement).
    pub prompt: String,
    /// Visual style requested from the provider (e.g. `"photorealistic"`).
    pub style: String,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, clamped at zero.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        (self.0 - earlier.0).num_milliseconds().max(0) as u64
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
