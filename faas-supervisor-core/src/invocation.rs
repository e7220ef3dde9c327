//! # invocation: per-invocation state and the two entry points
//!
//! [`Supervisor`] owns the configuration and the storage registry of one
//! invocation and exposes the input and output phases. Everything a phase
//! hands to the next one (directories, resolved input path, workload
//! variables) travels in an [`InvocationContext`] instead of the process
//! environment.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::config::FunctionConfig;
use crate::download::resolve_input;
use crate::error::{Result, SupervisorError};
use crate::event::{Classification, ParsedEvent};
use crate::registry::StorageRegistry;
use crate::upload::{dispatch_output, DispatchReport};

pub const INPUT_FILE_PATH_VAR: &str = "INPUT_FILE_PATH";
pub const TMP_INPUT_DIR_VAR: &str = "TMP_INPUT_DIR";
pub const TMP_OUTPUT_DIR_VAR: &str = "TMP_OUTPUT_DIR";
pub const SCRIPT_FILE_NAME: &str = "script.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub input_file_path: Option<PathBuf>,
    /// Container variables from the configuration, passed through unchanged.
    pub user_vars: BTreeMap<String, String>,
    /// Request parameters and storage event details.
    pub event_vars: BTreeMap<String, String>,
}

impl InvocationContext {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            input_file_path: None,
            user_vars: BTreeMap::new(),
            event_vars: BTreeMap::new(),
        }
    }

    pub fn with_classification(mut self, classification: &Classification) -> Self {
        self.event_vars.extend(classification.workload_env());
        self
    }

    /// Full variable set for the workload process.
    pub fn workload_env(&self) -> BTreeMap<String, String> {
        let mut env = self.user_vars.clone();
        env.extend(self.event_vars.clone());
        env.insert(
            TMP_INPUT_DIR_VAR.to_string(),
            self.input_dir.display().to_string(),
        );
        env.insert(
            TMP_OUTPUT_DIR_VAR.to_string(),
            self.output_dir.display().to_string(),
        );
        if let Some(path) = &self.input_file_path {
            env.insert(INPUT_FILE_PATH_VAR.to_string(), path.display().to_string());
        }
        env
    }
}

/// How the user workload is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadInvocation {
    /// Script shipped base64-encoded in the event, written to disk.
    Script(PathBuf),
    /// Explicit command line from the event.
    Args(Vec<String>),
    /// Script configured for the function.
    InitScript(PathBuf),
    /// Run the container entrypoint as is.
    ContainerOnly,
}

impl WorkloadInvocation {
    /// Event fields win over the configured init script.
    pub async fn resolve(
        event: &ParsedEvent,
        init_script: Option<&str>,
        script_dir: &Path,
    ) -> Result<Self> {
        let envelope = event.raw.as_json().and_then(Value::as_object);
        if let Some(encoded) = envelope
            .and_then(|m| m.get("script"))
            .and_then(Value::as_str)
        {
            let script = STANDARD
                .decode(encoded.trim())
                .map_err(|e| SupervisorError::malformed("script", e.to_string()))?;
            let path = script_dir.join(SCRIPT_FILE_NAME);
            tokio::fs::write(&path, script).await?;
            debug!(path = %path.display(), "Wrote user script from event");
            return Ok(WorkloadInvocation::Script(path));
        }
        if let Some(args) = envelope.and_then(|m| m.get("cmd_args")) {
            return Ok(WorkloadInvocation::Args(parse_cmd_args(args)?));
        }
        Ok(match init_script.filter(|s| !s.is_empty()) {
            Some(script) => WorkloadInvocation::InitScript(PathBuf::from(script)),
            None => WorkloadInvocation::ContainerOnly,
        })
    }

    /// Command line to execute, `None` for the container entrypoint.
    pub fn command(&self) -> Option<Vec<String>> {
        match self {
            WorkloadInvocation::Script(path) | WorkloadInvocation::InitScript(path) => {
                Some(vec!["/bin/sh".to_string(), path.display().to_string()])
            }
            WorkloadInvocation::Args(args) => Some(args.clone()),
            WorkloadInvocation::ContainerOnly => None,
        }
    }
}

/// `cmd_args` is either a JSON list or a string holding one.
fn parse_cmd_args(value: &Value) -> Result<Vec<String>> {
    let list = match value {
        Value::String(text) => serde_json::from_str::<Value>(text)?,
        other => other.clone(),
    };
    let Value::Array(items) = list else {
        return Err(SupervisorError::malformed("cmd_args", "expected a list"));
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

/// Body returned to the caller when an invocation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub exception: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub warning: bool,
}

impl From<&SupervisorError> for ErrorResponse {
    fn from(e: &SupervisorError) -> Self {
        Self {
            exception: e.to_string(),
            warning: e.is_warning(),
        }
    }
}

impl ErrorResponse {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"exception\":{:?}}}", self.exception))
    }
}

/// Configuration and storage of one invocation.
pub struct Supervisor {
    config: FunctionConfig,
    registry: StorageRegistry,
}

impl Supervisor {
    /// Loads credentials (failing fast on incomplete ones) and the storage
    /// paths declared in `env`.
    pub fn new(mut config: FunctionConfig, env: &HashMap<String, String>) -> Result<Self> {
        let credentials = CredentialStore::load(&config.storage_providers, env.iter())?;
        config.merge_env_paths(env, &credentials)?;
        config.trace_loaded();
        Ok(Self::from_parts(config, StorageRegistry::new(credentials)))
    }

    pub fn from_parts(config: FunctionConfig, registry: StorageRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &FunctionConfig {
        &self.config
    }

    pub fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    /// Fresh context for an invocation, carrying the configured container
    /// variables and the classified event's variables.
    pub fn context(
        &self,
        classification: &Classification,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> InvocationContext {
        let mut ctx = InvocationContext::new(input_dir, output_dir);
        ctx.user_vars = self.config.container.environment.variables.clone();
        ctx.with_classification(classification)
    }

    /// Input phase. Honours `download_input: false`.
    pub async fn fetch_input(
        &self,
        event: &ParsedEvent,
        ctx: &mut InvocationContext,
    ) -> Result<Option<PathBuf>> {
        if !self.config.download_input_enabled() {
            info!("[INPUT] Input download disabled by configuration");
            return Ok(None);
        }
        let path = resolve_input(&self.registry, &self.config, event, &ctx.input_dir).await?;
        if path.is_none() {
            warn!("[INPUT] No input file produced");
        }
        ctx.input_file_path = path.clone();
        Ok(path)
    }

    /// Output phase.
    pub async fn upload_output(&self, ctx: &InvocationContext) -> Result<DispatchReport> {
        dispatch_output(&self.registry, &self.config.output, &ctx.output_dir).await
    }
}
