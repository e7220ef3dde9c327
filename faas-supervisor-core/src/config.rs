use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, ProviderSelector};
use crate::error::{Result, SupervisorError};

pub const STORAGE_PATH_ENV_PREFIX: &str = "STORAGE_PATH_";

/// Function configuration document, as deployed next to the workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Vec<StorageIo>,
    #[serde(default)]
    pub output: Vec<OutputRule>,
    /// Raw provider blocks; validated by [`CredentialStore::from_sections`].
    #[serde(default)]
    pub storage_providers: BTreeMap<String, serde_yaml::Value>,
    #[serde(default, deserialize_with = "bool_like")]
    pub download_input: Option<bool>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default)]
    pub init_script: Option<String>,
    #[serde(default)]
    pub container: ContainerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSection {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub environment: ContainerEnvironment,
}

/// User-defined variables passed to the workload unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerEnvironment {
    #[serde(default, rename = "Variables")]
    pub variables: BTreeMap<String, String>,
}

/// An input binding: where triggering objects live for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIo {
    pub storage_provider: String,
    pub path: String,
}

/// One output upload rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRule {
    pub storage_provider: String,
    pub path: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub prefix: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub suffix: Vec<String>,
}

impl OutputRule {
    pub fn new(storage_provider: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            storage_provider: storage_provider.into(),
            path: path.into(),
            prefix: Vec::new(),
            suffix: Vec::new(),
        }
    }

    pub fn selector(&self) -> Result<ProviderSelector> {
        self.storage_provider.parse()
    }

    /// Prefixes and suffixes are each OR-matched, and both filters must pass.
    /// `file_name` is the path relative to the output directory.
    pub fn matches(&self, file_name: &str) -> bool {
        let prefix_ok =
            self.prefix.is_empty() || self.prefix.iter().any(|p| file_name.starts_with(p.as_str()));
        let suffix_ok =
            self.suffix.is_empty() || self.suffix.iter().any(|s| file_name.ends_with(s.as_str()));
        prefix_ok && suffix_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDirection {
    Input,
    Output,
}

/// Parses `STORAGE_PATH_<INPUT|OUTPUT>_<ID>` into its direction and provider id.
pub fn parse_storage_path_key(name: &str) -> Result<Option<(PathDirection, String)>> {
    let Some(rest) = name.strip_prefix(STORAGE_PATH_ENV_PREFIX) else {
        return Ok(None);
    };
    let (kind, id) = rest.split_once('_').unwrap_or((rest, ""));
    let direction = match kind {
        "INPUT" => PathDirection::Input,
        "OUTPUT" => PathDirection::Output,
        other => {
            return Err(SupervisorError::InvalidStoragePathType {
                storage_type: other.to_string(),
            })
        }
    };
    if id.is_empty() {
        return Err(SupervisorError::Config(format!(
            "storage path variable '{name}' has no provider id"
        )));
    }
    Ok(Some((direction, id.to_string())))
}

impl FunctionConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: FunctionConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn trace_loaded(&self) {
        info!(
            name = ?self.name,
            inputs = self.input.len(),
            outputs = self.output.len(),
            providers = self.storage_providers.len(),
            "Loaded function config"
        );
        debug!(?self, "Function config loaded (full debug)");
    }

    /// `true` unless explicitly disabled.
    pub fn download_input_enabled(&self) -> bool {
        self.download_input.unwrap_or(true)
    }

    /// Variables like `LOG_LEVEL` or `DOWNLOAD_INPUT` win over the document.
    pub fn apply_env_overrides(&mut self, env: &HashMap<String, String>) {
        if let Some(level) = env.get("LOG_LEVEL") {
            self.log_level = Some(level.clone());
        }
        if let Some(mode) = env.get("EXECUTION_MODE") {
            self.execution_mode = Some(mode.clone());
        }
        if let Some(script) = env.get("INIT_SCRIPT") {
            self.init_script = Some(script.clone());
        }
        if let Some(value) = env.get("DOWNLOAD_INPUT") {
            match parse_bool(value) {
                Some(flag) => self.download_input = Some(flag),
                None => warn!(value = %value, "Ignoring unparsable DOWNLOAD_INPUT"),
            }
        }
    }

    /// Adds input bindings and output rules declared as `STORAGE_PATH_*`
    /// variables. The provider type comes from the credential record with the
    /// same id.
    pub fn merge_env_paths(
        &mut self,
        env: &HashMap<String, String>,
        credentials: &CredentialStore,
    ) -> Result<()> {
        let mut names: Vec<&String> = env.keys().collect();
        names.sort();
        for name in names {
            let Some((direction, id)) = parse_storage_path_key(name)? else {
                continue;
            };
            let record = credentials
                .find_by_id(&id)
                .ok_or_else(|| SupervisorError::storage_auth(id.clone()))?;
            let selector = record.selector().to_string();
            let path = env[name].clone();
            debug!(?direction, provider = %selector, path = %path, "Storage path from environment");
            match direction {
                PathDirection::Input => self.input.push(StorageIo {
                    storage_provider: selector,
                    path,
                }),
                PathDirection::Output => self.output.push(OutputRule::new(selector, path)),
            }
        }
        Ok(())
    }

    /// Input binding for a provider selector, if one is configured.
    pub fn input_for(&self, selector: &ProviderSelector) -> Option<&StorageIo> {
        self.input.iter().find(|io| {
            io.storage_provider
                .parse::<ProviderSelector>()
                .map(|s| &s == selector)
                .unwrap_or(false)
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn bool_like<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolLike {
        Bool(bool),
        Text(String),
    }
    match Option::<BoolLike>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolLike::Bool(b)) => Ok(Some(b)),
        Some(BoolLike::Text(s)) => parse_bool(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("not a boolean: '{s}'"))),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}
