//! # auth: provider-scoped storage credentials
//!
//! Credentials come from two places and end up in the same shape:
//!
//! - the `storage_providers` section of the function configuration, keyed by
//!   provider type and then by provider id;
//! - `STORAGE_AUTH_<TYPE>_<ID>_<KEY>` environment variables. The id may contain
//!   underscores, so the key is split right-anchored: first token is the type,
//!   last token is the credential key, everything in between is the id.
//!
//! Every declared record is validated when the store is built. A provider block
//! that is present but incomplete fails immediately with
//! [`SupervisorError::StorageAuth`] instead of surfacing halfway through an
//! invocation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};

pub const DEFAULT_PROVIDER_ID: &str = "default";
pub const AUTH_ENV_PREFIX: &str = "STORAGE_AUTH_";

/// Remote storage families the supervisor knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    S3,
    Minio,
    Onedata,
    Webdav,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::S3 => "S3",
            ProviderType::Minio => "MINIO",
            ProviderType::Onedata => "ONEDATA",
            ProviderType::Webdav => "WEBDAV",
        }
    }

    /// Credential keys that must be present and non-empty for a declared record.
    pub fn required_credentials(&self) -> &'static [&'static str] {
        match self {
            ProviderType::S3 | ProviderType::Minio => &["access_key", "secret_key"],
            ProviderType::Onedata => &["oneprovider_host", "token", "space"],
            ProviderType::Webdav => &["hostname", "login", "password"],
        }
    }

    /// Maps the short keys used in environment variables onto the names used by
    /// the configuration document.
    pub fn canonical_credential_key(&self, key: &str) -> String {
        let lower = key.to_ascii_lowercase();
        let mapped = match (self, lower.as_str()) {
            (ProviderType::S3 | ProviderType::Minio, "user") => "access_key",
            (ProviderType::S3 | ProviderType::Minio, "pass") => "secret_key",
            (ProviderType::Onedata, "host") => "oneprovider_host",
            (ProviderType::Webdav, "host") => "hostname",
            (ProviderType::Webdav, "user") => "login",
            (ProviderType::Webdav, "pass") => "password",
            _ => return lower,
        };
        mapped.to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S3" => Ok(ProviderType::S3),
            "MINIO" => Ok(ProviderType::Minio),
            "ONEDATA" => Ok(ProviderType::Onedata),
            "WEBDAV" => Ok(ProviderType::Webdav),
            other => Err(SupervisorError::InvalidStorageProvider {
                storage_type: other.to_string(),
            }),
        }
    }
}

/// `<provider_type>.<provider_id>`, or a bare provider type meaning the default id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderSelector {
    pub provider_type: ProviderType,
    pub provider_id: String,
}

impl ProviderSelector {
    pub fn new(provider_type: ProviderType, provider_id: impl Into<String>) -> Self {
        Self {
            provider_type,
            provider_id: provider_id.into(),
        }
    }
}

impl FromStr for ProviderSelector {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = match s.split_once('.') {
            Some((kind, id)) if !id.is_empty() => (kind, id),
            Some((kind, _)) => (kind, DEFAULT_PROVIDER_ID),
            None => (s, DEFAULT_PROVIDER_ID),
        };
        Ok(Self::new(kind.parse()?, id))
    }
}

impl fmt::Display for ProviderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            self.provider_type.as_str().to_ascii_lowercase(),
            self.provider_id
        )
    }
}

/// Credentials of one configured storage backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    pub provider_type: ProviderType,
    pub provider_id: String,
    credentials: BTreeMap<String, String>,
}

impl AuthRecord {
    /// Builds a record and checks the provider's required credential set.
    pub fn new(
        provider_type: ProviderType,
        provider_id: impl Into<String>,
        credentials: BTreeMap<String, String>,
    ) -> Result<Self> {
        let record = Self {
            provider_type,
            provider_id: provider_id.into(),
            credentials,
        };
        record.validate()?;
        Ok(record)
    }

    /// The implicit `s3.default` record: no keys, ambient/instance credentials apply.
    pub fn ambient_s3() -> Self {
        Self {
            provider_type: ProviderType::S3,
            provider_id: DEFAULT_PROVIDER_ID.to_string(),
            credentials: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        for key in self.provider_type.required_credentials() {
            if self.credential(key).is_none() {
                warn!(
                    provider = %self.provider_type,
                    provider_id = %self.provider_id,
                    missing = *key,
                    "Storage credentials incomplete"
                );
                return Err(SupervisorError::storage_auth(self.provider_type.as_str()));
            }
        }
        Ok(())
    }

    /// Returns the credential value, treating empty strings as absent.
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_credentials(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn selector(&self) -> ProviderSelector {
        ProviderSelector::new(self.provider_type, self.provider_id.clone())
    }
}

/// Splits `STORAGE_AUTH_<TYPE>_<ID>_<KEY>` into `(TYPE, ID, KEY)`.
///
/// A variable with only `<TYPE>_<KEY>` is read as the default id. Returns
/// `None` when the name does not carry the prefix or is too short.
pub fn parse_auth_env_key(name: &str) -> Option<(String, String, String)> {
    let rest = name.strip_prefix(AUTH_ENV_PREFIX)?;
    let (kind, rest) = rest.split_once('_')?;
    if kind.is_empty() || rest.is_empty() {
        return None;
    }
    let (id, key) = match rest.rsplit_once('_') {
        Some((id, key)) if !id.is_empty() && !key.is_empty() => (id, key),
        Some(_) => return None,
        None => (DEFAULT_PROVIDER_ID, rest),
    };
    Some((kind.to_string(), id.to_string(), key.to_string()))
}

/// All credentials of an invocation, by provider type then provider id.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    records: BTreeMap<ProviderType, BTreeMap<String, AuthRecord>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        let mut records = BTreeMap::new();
        let ambient = AuthRecord::ambient_s3();
        records.insert(
            ProviderType::S3,
            BTreeMap::from([(ambient.provider_id.clone(), ambient)]),
        );
        Self { records }
    }
}

impl CredentialStore {
    /// Builds the store from the configuration section and then layers the
    /// `STORAGE_AUTH_*` variables found in `env` on top.
    pub fn load<I, K, V>(sections: &BTreeMap<String, Value>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut store = Self::from_sections(sections)?;
        store.merge_env(env)?;
        info!(
            providers = store.len(),
            "Storage credentials loaded"
        );
        Ok(store)
    }

    /// Parses the `storage_providers` configuration section.
    pub fn from_sections(sections: &BTreeMap<String, Value>) -> Result<Self> {
        let mut store = Self::default();
        if sections.is_empty() {
            warn!("There is no storage provider defined for this function.");
        }
        for (kind, section) in sections {
            let provider_type: ProviderType = kind.parse()?;
            let ids = match section {
                Value::Null => continue,
                Value::Mapping(ids) if ids.is_empty() => continue,
                Value::Mapping(ids) => ids,
                _ => return Err(SupervisorError::storage_auth(provider_type.as_str())),
            };
            for (id, creds) in ids {
                let id = scalar_to_string(id)
                    .ok_or_else(|| SupervisorError::storage_auth(provider_type.as_str()))?;
                let creds = match creds {
                    Value::Mapping(map) => map
                        .iter()
                        .filter_map(|(k, v)| Some((scalar_to_string(k)?, scalar_to_string(v)?)))
                        .collect(),
                    _ => return Err(SupervisorError::storage_auth(provider_type.as_str())),
                };
                debug!(provider = %provider_type, provider_id = %id, "Parsed storage provider block");
                store.insert(AuthRecord::new(provider_type, id, creds)?);
            }
        }
        Ok(store)
    }

    fn merge_env<I, K, V>(&mut self, env: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pending: BTreeMap<(ProviderType, String), BTreeMap<String, String>> =
            BTreeMap::new();
        for (name, value) in env {
            let name = name.as_ref();
            if !name.starts_with(AUTH_ENV_PREFIX) {
                continue;
            }
            let (kind, id, key) = parse_auth_env_key(name).ok_or_else(|| {
                SupervisorError::Config(format!("malformed storage credential variable '{name}'"))
            })?;
            let provider_type: ProviderType = kind.parse()?;
            let key = provider_type.canonical_credential_key(&key);
            pending
                .entry((provider_type, id))
                .or_default()
                .insert(key, value.as_ref().to_string());
        }
        for ((provider_type, id), creds) in pending {
            let mut merged = self
                .get(provider_type, &id)
                .map(|r| r.credentials.clone())
                .unwrap_or_default();
            merged.extend(creds);
            debug!(provider = %provider_type, provider_id = %id, "Merged storage credentials from environment");
            self.insert(AuthRecord::new(provider_type, id, merged)?);
        }
        Ok(())
    }

    fn insert(&mut self, record: AuthRecord) {
        self.records
            .entry(record.provider_type)
            .or_default()
            .insert(record.provider_id.clone(), record);
    }

    pub fn get(&self, provider_type: ProviderType, provider_id: &str) -> Option<&AuthRecord> {
        self.records.get(&provider_type)?.get(provider_id)
    }

    pub fn get_selector(&self, selector: &ProviderSelector) -> Option<&AuthRecord> {
        self.get(selector.provider_type, &selector.provider_id)
    }

    /// Every record of one provider type, ordered by id.
    pub fn records_of(&self, provider_type: ProviderType) -> impl Iterator<Item = &AuthRecord> {
        self.records
            .get(&provider_type)
            .into_iter()
            .flat_map(|ids| ids.values())
    }

    /// First record of `provider_type` whose credential `key` equals `value`.
    pub fn find_by_credential(
        &self,
        provider_type: ProviderType,
        key: &str,
        value: &str,
    ) -> Option<&AuthRecord> {
        self.records_of(provider_type)
            .find(|r| r.credential(key) == Some(value))
    }

    /// Looks a record up by id alone, across every provider type. Declared
    /// records win over the credential-less `s3.default`.
    pub fn find_by_id(&self, provider_id: &str) -> Option<&AuthRecord> {
        let mut candidates = self.records.values().filter_map(|ids| ids.get(provider_id));
        let first = candidates.next()?;
        if first.has_credentials() {
            return Some(first);
        }
        candidates.find(|r| r.has_credentials()).or(Some(first))
    }

    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections(yaml: &str) -> BTreeMap<String, Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn env_key_split_is_right_anchored() {
        let parsed = parse_auth_env_key("STORAGE_AUTH_MINIO_my-id_123_USER").unwrap();
        assert_eq!(
            parsed,
            ("MINIO".to_string(), "my-id_123".to_string(), "USER".to_string())
        );
    }

    #[test]
    fn env_key_without_id_uses_default() {
        let parsed = parse_auth_env_key("STORAGE_AUTH_S3_USER").unwrap();
        assert_eq!(parsed.1, DEFAULT_PROVIDER_ID);
        assert_eq!(parsed.2, "USER");
        assert!(parse_auth_env_key("STORAGE_AUTH_MINIO").is_none());
        assert!(parse_auth_env_key("OTHER_MINIO_ID_USER").is_none());
    }

    #[test]
    fn selector_defaults_id() {
        let sel: ProviderSelector = "s3".parse().unwrap();
        assert_eq!(sel, ProviderSelector::new(ProviderType::S3, "default"));
        let sel: ProviderSelector = "minio.test_minio".parse().unwrap();
        assert_eq!(sel.provider_type, ProviderType::Minio);
        assert_eq!(sel.provider_id, "test_minio");
        assert_eq!(sel.to_string(), "minio.test_minio");
    }

    #[test]
    fn unknown_provider_type_is_rejected() {
        let err = "ftp.box".parse::<ProviderSelector>().unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidStorageProvider { ref storage_type } if storage_type == "FTP"));
    }

    #[test]
    fn default_s3_record_always_exists() {
        let store = CredentialStore::from_sections(&BTreeMap::new()).unwrap();
        let s3 = store.get(ProviderType::S3, "default").unwrap();
        assert!(!s3.has_credentials());
    }

    #[test]
    fn minio_block_without_secret_fails_fast() {
        let yaml = r#"
minio:
  test_minio:
    access_key: test_minio_access
    secret_key: ""
"#;
        let err = CredentialStore::from_sections(&sections(yaml)).unwrap_err();
        assert!(matches!(err, SupervisorError::StorageAuth { ref auth_type } if auth_type == "MINIO"));
    }

    #[test]
    fn flat_block_is_not_a_valid_provider_map() {
        let yaml = r#"
onedata:
  token: test_onedata_token
  space: test_onedata_space
"#;
        let err = CredentialStore::from_sections(&sections(yaml)).unwrap_err();
        assert!(matches!(err, SupervisorError::StorageAuth { ref auth_type } if auth_type == "ONEDATA"));
    }

    #[test]
    fn env_credentials_merge_with_aliases() {
        let env = vec![
            ("STORAGE_AUTH_MINIO_cluster_2_USER", "alice"),
            ("STORAGE_AUTH_MINIO_cluster_2_PASS", "secret"),
            ("STORAGE_AUTH_MINIO_cluster_2_ENDPOINT", "http://minio:9000"),
            ("PATH", "/usr/bin"),
        ];
        let store = CredentialStore::load(&BTreeMap::new(), env).unwrap();
        let rec = store.get(ProviderType::Minio, "cluster_2").unwrap();
        assert_eq!(rec.credential("access_key"), Some("alice"));
        assert_eq!(rec.credential("secret_key"), Some("secret"));
        assert_eq!(rec.credential("endpoint"), Some("http://minio:9000"));
    }

    #[test]
    fn find_by_id_prefers_declared_record_over_ambient_s3() {
        let env = vec![
            ("STORAGE_AUTH_MINIO_default_USER", "minio"),
            ("STORAGE_AUTH_MINIO_default_PASS", "minio123"),
        ];
        let store = CredentialStore::load(&BTreeMap::new(), env).unwrap();
        let rec = store.find_by_id("default").unwrap();
        assert_eq!(rec.provider_type, ProviderType::Minio);

        let ambient_only = CredentialStore::default();
        let rec = ambient_only.find_by_id("default").unwrap();
        assert_eq!(rec.provider_type, ProviderType::S3);
        assert!(ambient_only.find_by_id("other").is_none());
    }

    #[test]
    fn find_by_credential_picks_matching_space() {
        let yaml = r#"
onedata:
  first:
    oneprovider_host: host
    token: t
    space: other
  second:
    oneprovider_host: host
    token: t
    space: space_ok
"#;
        let store = CredentialStore::from_sections(&sections(yaml)).unwrap();
        let rec = store
            .find_by_credential(ProviderType::Onedata, "space", "space_ok")
            .unwrap();
        assert_eq!(rec.provider_id, "second");
        assert!(store
            .find_by_credential(ProviderType::Onedata, "space", "missing")
            .is_none());
    }
}
