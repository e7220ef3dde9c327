//! # download: input resolution
//!
//! Picks the backend that serves a classified event and fetches the triggering
//! object into the working directory:
//!
//! - HTTP gateway and unknown events are persisted as they are by the local
//!   backend;
//! - Onedata events pick the provider whose `space` matches the first segment
//!   of the object key;
//! - dCache events use the `webdav.<id>` provider (`dcache` unless the event
//!   carries a hint) and have their key rebased onto that provider's input
//!   path;
//! - other storage events use the hinted provider id, or `default`.
//!
//! Download failures are fatal and are not retried here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::auth::{ProviderSelector, ProviderType, DEFAULT_PROVIDER_ID};
use crate::config::FunctionConfig;
use crate::contract::StorageBackend;
use crate::error::{Result, SupervisorError};
use crate::event::{ParsedEvent, Provenance};
use crate::registry::StorageRegistry;

pub const DCACHE_PROVIDER_ID: &str = "dcache";

/// Downloads the input of `event` into `working_dir` and returns its path.
pub async fn resolve_input(
    registry: &StorageRegistry,
    config: &FunctionConfig,
    event: &ParsedEvent,
    working_dir: &Path,
) -> Result<Option<PathBuf>> {
    info!(
        provenance = event.provenance.as_str(),
        object_key = ?event.object_key,
        dir = %working_dir.display(),
        "[INPUT] Resolving input"
    );

    let (backend, event) = match select_backend(registry, config, event)? {
        Some((backend, event)) => (backend, event),
        None => (registry.local(), event.clone()),
    };

    let path = match backend.download(&event, working_dir).await {
        Ok(path) => path,
        Err(e) => {
            error!(error = %e, backend = backend.kind(), "[INPUT][ERROR] Download failed");
            return Err(e);
        }
    };
    if !path.is_file() {
        warn!(path = %path.display(), "[INPUT] Downloaded input is not a regular file");
        return Ok(None);
    }
    info!(path = %path.display(), backend = backend.kind(), "[INPUT] Input ready");
    Ok(Some(path))
}

/// Backend for a storage event, plus the event as that backend should see it.
/// `None` means the local fallback.
fn select_backend(
    registry: &StorageRegistry,
    config: &FunctionConfig,
    event: &ParsedEvent,
) -> Result<Option<(Arc<dyn StorageBackend>, ParsedEvent)>> {
    let Some(provider_type) = event.provenance.provider_type() else {
        if event.provenance == Provenance::Rucio {
            warn!("[INPUT] No storage provider serves Rucio events, persisting the payload");
        }
        return Ok(None);
    };

    let selector = match provider_type {
        ProviderType::Onedata => onedata_selector(registry, event)?,
        _ => {
            let default_id = if event.provenance == Provenance::DCache {
                DCACHE_PROVIDER_ID
            } else {
                DEFAULT_PROVIDER_ID
            };
            let id = event
                .auth_hint
                .as_deref()
                .and_then(hinted_provider_id)
                .unwrap_or(default_id);
            ProviderSelector::new(provider_type, id)
        }
    };

    let backend = match registry.resolve_selector(&selector) {
        Ok(backend) => backend,
        Err(SupervisorError::StorageAuth { .. }) => {
            warn!(provider = %selector, "[INPUT] No credentials for event provider, persisting the payload");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let event = match event.provenance {
        Provenance::DCache => match config.input_for(&selector) {
            Some(io) => event.rebased(&io.path),
            None => {
                warn!(provider = %selector, "[INPUT] No input path configured for dCache provider");
                event.clone()
            }
        },
        _ => event.clone(),
    };
    Ok(Some((backend, event)))
}

/// The Onedata record whose `space` is the first segment of the object key.
fn onedata_selector(registry: &StorageRegistry, event: &ParsedEvent) -> Result<ProviderSelector> {
    let space = event
        .object_key
        .as_deref()
        .map(|key| key.trim_start_matches('/'))
        .and_then(|key| key.split('/').next())
        .unwrap_or_default();
    registry
        .credentials()
        .find_by_credential(ProviderType::Onedata, "space", space)
        .map(|record| record.selector())
        .ok_or_else(|| {
            warn!(space, "[INPUT] No Onedata provider for event space");
            SupervisorError::storage_auth(ProviderType::Onedata.as_str())
        })
}

/// `minio.cluster2` -> `cluster2`; a bare type carries no id.
fn hinted_provider_id(hint: &str) -> Option<&str> {
    hint.split_once('.')
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_ids() {
        assert_eq!(hinted_provider_id("minio.cluster2"), Some("cluster2"));
        assert_eq!(hinted_provider_id("minio"), None);
        assert_eq!(hinted_provider_id("webdav."), None);
    }
}
