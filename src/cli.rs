/// # faas-supervisor CLI
///
/// Thin command-line glue over [`faas_supervisor_core`]. Each subcommand is one
/// phase of an invocation and prints a JSON document on stdout; logs go to
/// stderr. Failures print `{"exception": "..."}` and exit non-zero.
///
/// - `classify`: show how a trigger payload is recognised
/// - `input`: classify and fetch the input into a directory
/// - `output`: upload a directory according to the output rules
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use faas_supervisor_core::event::{classify_bytes, Classification};
use faas_supervisor_core::{
    ErrorResponse, InvocationContext, Supervisor, SupervisorError, WorkloadInvocation,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(
    name = "faas-supervisor",
    version,
    about = "Classify function trigger events and move input/output data to remote storage"
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); falls back to LOG_LEVEL
    #[clap(long, global = true)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify an event payload and print the result
    Classify {
        /// File holding the event payload, `-` for stdin
        #[clap(long, default_value = "-")]
        event: PathBuf,
    },
    /// Classify an event and download its input
    Input {
        #[clap(long, default_value = "-")]
        event: PathBuf,
        /// Directory that receives the input file
        #[clap(long)]
        input_dir: PathBuf,
        /// Directory the workload writes its results to
        #[clap(long)]
        output_dir: Option<PathBuf>,
        /// Path to the YAML function configuration
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Upload every file of a directory according to the output rules
    Output {
        #[clap(long)]
        output_dir: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    let env: HashMap<String, String> = std::env::vars().collect();

    match execute(cli.command, &env).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            let response = match e.downcast_ref::<SupervisorError>() {
                Some(err) => ErrorResponse::from(err),
                None => ErrorResponse {
                    exception: e.to_string(),
                    warning: false,
                },
            };
            tracing::error!(error = %e, "Invocation failed");
            println!("{}", response.to_json());
            Err(e)
        }
    }
}

async fn execute(command: Commands, env: &HashMap<String, String>) -> Result<Value> {
    match command {
        Commands::Classify { event } => {
            let classification = classify_bytes(&read_event(&event)?);
            classification_json(&classification)
        }
        Commands::Input {
            event,
            input_dir,
            output_dir,
            config,
        } => {
            let supervisor = Supervisor::new(load_config(config.as_deref(), env)?, env)?;
            let classification = classify_bytes(&read_event(&event)?);
            let output_dir = output_dir.unwrap_or_else(|| input_dir.clone());
            let mut ctx = supervisor.context(&classification, &input_dir, &output_dir);
            let input = supervisor.fetch_input(&classification.event, &mut ctx).await?;
            let workload = WorkloadInvocation::resolve(
                &classification.event,
                supervisor.config().init_script.as_deref(),
                &input_dir,
            )
            .await?;
            tracing::info!(command = "input", input = ?input, "Input phase complete");
            Ok(json!({
                "provenance": classification.event.provenance,
                "input_file_path": input,
                "command": workload.command(),
                "env": ctx.workload_env(),
            }))
        }
        Commands::Output { output_dir, config } => {
            let supervisor = Supervisor::new(load_config(config.as_deref(), env)?, env)?;
            let ctx = InvocationContext::new(&output_dir, &output_dir);
            let report = supervisor.upload_output(&ctx).await?;
            tracing::info!(
                command = "output",
                uploaded = report.uploaded.len(),
                failed = report.failed.len(),
                "Output phase complete"
            );
            Ok(serde_json::to_value(&report)?)
        }
    }
}

fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        return Ok(bytes);
    }
    std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Failed to read event file {}: {}", path.display(), e))
}

fn classification_json(classification: &Classification) -> Result<Value> {
    let event = &classification.event;
    Ok(json!({
        "provenance": event.provenance,
        "object_key": event.object_key,
        "display_name": event.display_name,
        "container_id": event.container_id,
        "event_time": event.event_time,
        "auth_hint": event.auth_hint,
        "env": classification.workload_env(),
    }))
}
