//! Inkwell CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: read an optional `inkwell.toml`, overlay the
//!    command-line flags, and validate the result into a `WorkflowConfig`.
//! 2. **Wire observability**: configure `tracing-subscriber` with a text or
//!    JSON layer and, when an endpoint is given, an OpenTelemetry OTLP
//!    exporter. All spans and events from every crate flow through it.
//! 3. **Construct infrastructure**: build the concrete text, search, and image
//!    adapters from explicit credentials and inject them into the engine.
//! 4. **Run and report**: stream stage progress to stderr, then print the
//!    article (or the full state as JSON) and exit non-zero on failure.

mod observability;
mod settings;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use nodes::{PromptTemplates, TemplateKey, WorkflowEngine};
use pipeline::{EditorStyle, StageLogEntry, StageOutcome, WorkflowConfig, WorkflowState};
use tokio::sync::watch;

use settings::{Cli, Command, GenerateArgs};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _telemetry = observability::init(cli.log_format, cli.otlp_endpoint.as_deref())?;

    match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Templates { style, prompts_dir } => {
            let templates = load_templates(prompts_dir.as_deref())?;
            let style = style
                .as_deref()
                .map(str::parse::<EditorStyle>)
                .transpose()?;
            print_templates(&templates, style);
            Ok(ExitCode::SUCCESS)
        }
        Command::ValidateConfig { config } => {
            let file = settings::load_config_file(&config)?;
            let validated = WorkflowConfig::try_from(file)
                .with_context(|| format!("{} is not a valid configuration", config.display()))?;
            println!("{} is valid", config.display());
            println!("{}", serde_json::to_string_pretty(&validated)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_templates(dir: Option<&std::path::Path>) -> anyhow::Result<PromptTemplates> {
    match dir {
        Some(dir) => PromptTemplates::with_overrides_from(dir)
            .with_context(|| format!("failed to load templates from {}", dir.display())),
        None => Ok(PromptTemplates::builtin()),
    }
}

async fn generate(args: GenerateArgs) -> anyhow::Result<ExitCode> {
    let config = args.workflow_config()?;
    let templates = load_templates(args.prompts_dir.as_deref())?;
    let capabilities = args.capabilities(&config)?;
    let engine = WorkflowEngine::new(capabilities, &templates, config)?;

    let (progress, mut updates) = watch::channel(Vec::<StageLogEntry>::new());
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while updates.changed().await.is_ok() {
            let log = updates.borrow_and_update().clone();
            for entry in log.iter().skip(printed) {
                eprintln!("{}", describe(entry));
            }
            printed = log.len();
        }
    });

    let state = engine
        .execute_with_progress(&args.topic, args.words, &progress)
        .await;
    drop(progress);
    printer.await.context("progress printer panicked")?;
    let state = state?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    match state.error() {
        Some(error) => {
            eprintln!("error: {error}");
            Ok(ExitCode::FAILURE)
        }
        None => {
            if !args.json || args.output.is_some() {
                write_article(&state, args.output.as_deref())?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn describe(entry: &StageLogEntry) -> String {
    let elapsed = entry.finished_at.millis_since(entry.started_at);
    let outcome = match &entry.outcome {
        StageOutcome::Completed => "completed".to_string(),
        StageOutcome::Failed { kind, message } => format!("failed ({kind}): {message}"),
        StageOutcome::TimedOut => "timed out".to_string(),
    };
    format!(
        "[{}] attempt {}: {outcome} in {elapsed} ms",
        entry.stage, entry.attempt
    )
}

/// The final article followed by its images as Markdown.
fn render_article(state: &WorkflowState) -> String {
    let mut out = state.final_article().unwrap_or_default().trim_end().to_string();
    for image in state.images() {
        out.push_str(&format!("\n\n![{}]({})", image.style, image.asset));
    }
    out.push('\n');
    out
}

fn write_article(state: &WorkflowState, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let article = render_article(state);
    match output {
        Some(path) => {
            std::fs::write(path, article)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("article written to {}", path.display());
        }
        None => print!("{article}"),
    }
    Ok(())
}

fn print_templates(templates: &PromptTemplates, style: Option<EditorStyle>) {
    let keys = TemplateKey::all().filter(|key| match (style, key) {
        (None, _) => true,
        (Some(wanted), TemplateKey::Editor(s)) => *s == wanted,
        (Some(_), _) => false,
    });
    for key in keys {
        if let Some(template) = templates.get(key) {
            println!("==== {key} ({}) ====", key.file_name());
            println!("{}", template.text().trim_end());
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{
        AssetReference, ErrorKind, ImageReference, Stage, StateDelta, Timestamp, Topic, WordCount,
    };

    #[test]
    fn test_describe_formats_each_outcome() {
        let at = Timestamp::now();
        let entry = |outcome| StageLogEntry {
            stage: Stage::Write,
            started_at: at,
            finished_at: at,
            attempt: 2,
            outcome,
        };

        assert_eq!(
            describe(&entry(StageOutcome::Completed)),
            "[Write] attempt 2: completed in 0 ms"
        );
        assert_eq!(
            describe(&entry(StageOutcome::Failed {
                kind: ErrorKind::ExternalCallFailed,
                message: "HTTP 500".to_string()
            })),
            "[Write] attempt 2: failed (ExternalCallFailed): HTTP 500 in 0 ms"
        );
        assert_eq!(
            describe(&entry(StageOutcome::TimedOut)),
            "[Write] attempt 2: timed out in 0 ms"
        );
    }

    #[test]
    fn test_render_article_appends_images() {
        let mut state = WorkflowState::new(
            Topic::new("Rust").unwrap(),
            WordCount::new(100).unwrap(),
            EditorStyle::General,
        );
        for (stage, delta) in [
            (
                Stage::Research,
                StateDelta::Research {
                    research_summary: "notes".to_string(),
                },
            ),
            (
                Stage::Write,
                StateDelta::Draft {
                    draft: "draft".to_string(),
                },
            ),
            (
                Stage::Edit,
                StateDelta::Edit {
                    final_article: "# Rust\n\nBody.\n".to_string(),
                    images: vec![ImageReference {
                        asset: AssetReference::new("https://img.example/1.png").unwrap(),
                        prompt: "crab".to_string(),
                        style: "photorealistic".to_string(),
                    }],
                },
            ),
        ] {
            state.enter(stage).unwrap();
            state.apply(delta).unwrap();
        }

        assert_eq!(
            render_article(&state),
            "# Rust\n\nBody.\n\n![photorealistic](https://img.example/1.png)\n"
        );
    }
}
