//! Error taxonomy shared by every stage of an invocation.
//!
//! Configuration errors are raised while building the credential store or the
//! registry and are always fatal. Classification problems are *warnings*: the
//! classifier downgrades them to an unknown event. Download errors abort input
//! resolution, while upload errors are collected per file by the dispatcher.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Credentials for a declared provider are missing or empty.
    #[error("The storage authentication of '{auth_type}' is not well-defined.")]
    StorageAuth { auth_type: String },

    #[error("Invalid storage provider type defined: '{storage_type}'.")]
    InvalidStorageProvider { storage_type: String },

    #[error("The storage path type '{storage_type}' is not allowed.")]
    InvalidStoragePathType { storage_type: String },

    /// A `Records` envelope carried an `eventSource` tag nobody handles.
    #[error("Unknown storage event detected: '{source_tag}'.")]
    UnknownStorageEvent { source_tag: String },

    /// A recognised dialect was missing a field it needs.
    #[error("Malformed {dialect} event: {reason}")]
    MalformedEvent { dialect: &'static str, reason: String },

    #[error("Downloading '{key}' from '{host}' failed: {status}")]
    Download {
        host: String,
        key: String,
        status: String,
    },

    #[error("Uploading '{file}' to '{destination}' failed: {reason}")]
    Upload {
        destination: String,
        file: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SupervisorError {
    pub fn storage_auth(auth_type: impl Into<String>) -> Self {
        SupervisorError::StorageAuth {
            auth_type: auth_type.into(),
        }
    }

    pub fn malformed(dialect: &'static str, reason: impl Into<String>) -> Self {
        SupervisorError::MalformedEvent {
            dialect,
            reason: reason.into(),
        }
    }

    /// Recoverable conditions the caller may downgrade instead of aborting.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            SupervisorError::UnknownStorageEvent { .. } | SupervisorError::MalformedEvent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_classification_problems_are_warnings() {
        assert!(SupervisorError::UnknownStorageEvent {
            source_tag: "narnia".into()
        }
        .is_warning());
        assert!(SupervisorError::malformed("S3", "missing key").is_warning());
        assert!(!SupervisorError::storage_auth("MINIO").is_warning());
        assert!(!SupervisorError::Download {
            host: "h".into(),
            key: "k".into(),
            status: "404".into()
        }
        .is_warning());
    }

    #[test]
    fn storage_auth_message_names_the_provider() {
        let msg = SupervisorError::storage_auth("ONEDATA").to_string();
        assert!(msg.contains("ONEDATA"), "got: {msg}");
    }
}
