/// `load_config` module: finds and decodes the function configuration document.
///
/// The document is looked up in this order:
/// 1. an explicit `--config` path;
/// 2. the well-known deployment path [`DEFAULT_CONFIG_PATH`];
/// 3. base64-encoded YAML in the `FUNCTION_CONFIG` variable;
/// 4. otherwise an empty configuration (no inputs, no outputs).
///
/// Scalar knobs are then overridden from upper-cased environment variables.
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use faas_supervisor_core::config::FunctionConfig;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DEFAULT_CONFIG_PATH: &str = "/oscar/config/function_config.yaml";
pub const FUNCTION_CONFIG_VAR: &str = "FUNCTION_CONFIG";

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Encoded(String),
    Empty,
}

/// Decides where the configuration comes from without reading it.
pub fn locate_config(path: Option<&Path>, env: &HashMap<String, String>) -> ConfigSource {
    if let Some(path) = path {
        return ConfigSource::File(path.to_path_buf());
    }
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.is_file() {
        return ConfigSource::File(default_path.to_path_buf());
    }
    match env.get(FUNCTION_CONFIG_VAR) {
        Some(encoded) if !encoded.trim().is_empty() => ConfigSource::Encoded(encoded.clone()),
        _ => ConfigSource::Empty,
    }
}

/// Loads the configuration and applies environment overrides.
pub fn load_config(path: Option<&Path>, env: &HashMap<String, String>) -> Result<FunctionConfig> {
    let source = locate_config(path, env);
    info!(source = ?source_label(&source), "Loading function configuration");

    let yaml = match &source {
        ConfigSource::File(path) => match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!(error = ?e, config_path = %path.display(), "Failed to read config file");
                return Err(anyhow::anyhow!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ));
            }
        },
        ConfigSource::Encoded(encoded) => {
            let bytes = match STANDARD.decode(encoded.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = ?e, "FUNCTION_CONFIG is not valid base64");
                    return Err(anyhow::anyhow!("Failed to decode {FUNCTION_CONFIG_VAR}: {e}"));
                }
            };
            String::from_utf8(bytes)
                .map_err(|e| anyhow::anyhow!("{FUNCTION_CONFIG_VAR} is not UTF-8: {e}"))?
        }
        ConfigSource::Empty => String::new(),
    };

    let mut config = if yaml.trim().is_empty() {
        FunctionConfig::default()
    } else {
        match FunctionConfig::from_yaml_str(&yaml) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to parse config YAML");
                return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
            }
        }
    };
    config.apply_env_overrides(env);
    Ok(config)
}

fn source_label(source: &ConfigSource) -> String {
    match source {
        ConfigSource::File(path) => path.display().to_string(),
        ConfigSource::Encoded(_) => FUNCTION_CONFIG_VAR.to_string(),
        ConfigSource::Empty => "empty".to_string(),
    }
}
