//! Inkwell stage agents, prompt templates, and the workflow engine.
//!
//! This crate provides the three stage agents (Researcher, Writer, Editor),
//! the enum-keyed store of instruction templates they bind, and the
//! [`WorkflowEngine`] that sequences them with per-stage retry and timeout
//! handling.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Agents sequence calls between the domain model in
//! the [`pipeline`] crate and the capability traits it defines
//! ([`pipeline::TextGenerator`], [`pipeline::SearchTool`],
//! [`pipeline::ImageGenerator`]). Concrete providers live in the `llm` and
//! `tools` crates and are injected by the caller.
//!
//! | Module        | Contents                                              |
//! |---------------|-------------------------------------------------------|
//! | [`engine`]    | `WorkflowEngine`, `Capabilities`, `run_workflow`      |
//! | [`stages`]    | `StageAgent` and the Researcher/Writer/Editor agents  |
//! | [`templates`] | `PromptTemplates`, `PromptTemplate`, `TemplateKey`    |

pub mod engine;
pub mod stages;
pub mod templates;

#[cfg(test)]
mod testing;

pub use engine::{run_workflow, Capabilities, StageLogSender, WorkflowEngine};
pub use stages::{Editor, Researcher, StageAgent, Writer};
pub use templates::{PromptTemplate, PromptTemplates, TemplateKey, TemplateLoadError};
