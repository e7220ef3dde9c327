//! # registry: from provider selectors to storage backends
//!
//! Backend construction does no I/O; each backend sets up its client on first
//! use. Resolved backends are memoised per `(type, id)` for the lifetime of the
//! registry, so one invocation reuses one client per destination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::auth::{AuthRecord, CredentialStore, ProviderSelector, ProviderType};
use crate::backend::{LocalBackend, ObjectStorageBackend, OnedataBackend, WebdavBackend};
use crate::contract::StorageBackend;
use crate::error::{Result, SupervisorError};

/// Builds the backend for a credential record. No record means the local
/// fallback.
pub fn create_backend(record: Option<&AuthRecord>) -> Arc<dyn StorageBackend> {
    match record {
        None => Arc::new(LocalBackend::new()),
        Some(record) => match record.provider_type {
            ProviderType::S3 | ProviderType::Minio => {
                Arc::new(ObjectStorageBackend::new(record.clone()))
            }
            ProviderType::Onedata => Arc::new(OnedataBackend::new(record)),
            ProviderType::Webdav => Arc::new(WebdavBackend::new(record)),
        },
    }
}

pub struct StorageRegistry {
    credentials: CredentialStore,
    cache: Mutex<HashMap<ProviderSelector, Arc<dyn StorageBackend>>>,
}

impl StorageRegistry {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            credentials,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Resolves `provider_type` (case-insensitive) and `provider_id`.
    pub fn resolve(&self, provider_type: &str, provider_id: &str) -> Result<Arc<dyn StorageBackend>> {
        let provider_type: ProviderType = provider_type.parse()?;
        self.resolve_selector(&ProviderSelector::new(provider_type, provider_id))
    }

    /// Resolves a declared provider. An undeclared id is a configuration error.
    pub fn resolve_selector(&self, selector: &ProviderSelector) -> Result<Arc<dyn StorageBackend>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(backend) = cache.get(selector) {
            debug!(provider = %selector, "Reusing cached storage backend");
            return Ok(Arc::clone(backend));
        }
        let record = self
            .credentials
            .get_selector(selector)
            .ok_or_else(|| SupervisorError::storage_auth(selector.provider_type.as_str()))?;
        let backend = create_backend(Some(record));
        info!(provider = %selector, backend = backend.kind(), "Storage backend resolved");
        cache.insert(selector.clone(), Arc::clone(&backend));
        Ok(backend)
    }

    /// Local fallback backend, for events without a remote provider.
    pub fn local(&self) -> Arc<dyn StorageBackend> {
        create_backend(None)
    }

    /// Installs a backend for `selector`, bypassing credential lookup.
    pub fn register(&self, selector: ProviderSelector, backend: Arc<dyn StorageBackend>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(selector, backend);
    }
}
