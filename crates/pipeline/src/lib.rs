//! Core orchestration domain for Inkwell.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, configuration record, and error type used by the Research → Write →
//! Edit workflow. Infrastructure crates implement the traits in [`ports`];
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `Topic`, etc.) |
//! | [`types`] | Shared value types (`WordCount`, `SearchHit`, `Timestamp`, etc.) |
//! | [`config`] | `WorkflowConfig` and its raw file form |
//! | [`state`] | `WorkflowState`, the stage log, and the phase machine |
//! | [`errors`] | Error taxonomy and retry-policy types |
//! | [`ports`] | Capability traits consumed by the stages |

pub mod config;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{EditorStyle, ImageFailurePolicy, WorkflowConfig, WorkflowConfigFile, MAX_RETRY_BACKOFF};
pub use errors::{
    Capability, CapabilityError, ConfigError, ErrorKind, ErrorRecord, RetryPolicy, StageError,
};
pub use identifiers::{AssetReference, RunId, SourceReference, Topic};
pub use ports::{ImageGenerator, SearchTool, TextGenerator};
pub use state::{
    DeltaRejected, Stage, StageLogEntry, StageOutcome, StateDelta, WorkflowPhase, WorkflowState,
};
pub use types::{ChatMessage, ChatRole, ImageReference, SearchHit, Timestamp, WordCount};
