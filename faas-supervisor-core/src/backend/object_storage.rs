//! S3 and MinIO backend on top of `object_store`.
//!
//! Both providers speak the same protocol; MinIO only differs by its endpoint
//! (in-cluster service by default), plain-HTTP support and optional TLS
//! verification. Clients are built lazily, one per bucket, on first use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use tracing::{debug, info};

use super::{download_target, join_remote, required_key};
use crate::auth::{AuthRecord, ProviderType};
use crate::contract::StorageBackend;
use crate::error::{Result, SupervisorError};
use crate::event::ParsedEvent;

pub const DEFAULT_MINIO_ENDPOINT: &str = "http://minio-service.minio:9000";
pub const DEFAULT_REGION: &str = "us-east-1";

pub struct ObjectStorageBackend {
    record: AuthRecord,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStorageBackend {
    pub fn new(record: AuthRecord) -> Self {
        Self {
            record,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Serves `bucket` from an existing store instead of building a client.
    pub fn with_store(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket.into(), store);
        self
    }

    fn is_minio(&self) -> bool {
        self.record.provider_type == ProviderType::Minio
    }

    /// Endpoint used for requests; `None` means the public AWS endpoint.
    pub fn endpoint(&self) -> Option<String> {
        match self.record.credential("endpoint") {
            Some(endpoint) => Some(endpoint.to_string()),
            None if self.is_minio() => Some(DEFAULT_MINIO_ENDPOINT.to_string()),
            None => None,
        }
    }

    fn host_label(&self) -> String {
        self.endpoint().unwrap_or_else(|| "s3.amazonaws.com".to_string())
    }

    fn verify_tls(&self) -> bool {
        !matches!(
            self.record.credential("verify").map(str::to_ascii_lowercase).as_deref(),
            Some("false" | "0" | "no")
        )
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let mut builder = if self.record.has_credentials() {
            AmazonS3Builder::new()
        } else {
            // Ambient credentials (instance role, AWS_* variables).
            AmazonS3Builder::from_env()
        };
        builder = builder
            .with_bucket_name(bucket)
            .with_region(self.record.credential("region").unwrap_or(DEFAULT_REGION));
        if let Some(key_id) = self.record.credential("access_key") {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = self.record.credential("secret_key") {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = self.endpoint() {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }
        if !self.verify_tls() {
            builder = builder
                .with_client_options(ClientOptions::new().with_allow_invalid_certificates(true));
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build().map_err(|e| {
            SupervisorError::Config(format!(
                "failed to create {} client for bucket '{bucket}': {e}",
                self.record.provider_type
            ))
        })?);
        debug!(provider = %self.record.provider_type, bucket, "Object storage client created");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

/// Splits an output path into bucket and object key. The first segment is the
/// bucket; the remaining segments (if any) prefix the file name.
pub fn split_destination(destination_path: &str, file_name: &str) -> (String, String) {
    let trimmed = destination_path.trim_matches('/');
    let (bucket, folder) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    (bucket.to_string(), join_remote(&[folder, file_name]))
}

#[async_trait]
impl StorageBackend for ObjectStorageBackend {
    fn kind(&self) -> &'static str {
        self.record.provider_type.as_str()
    }

    async fn download(&self, event: &ParsedEvent, dest_dir: &Path) -> Result<PathBuf> {
        let key = required_key(event, &self.host_label())?;
        let bucket = event
            .container_id
            .as_deref()
            .ok_or_else(|| SupervisorError::Download {
                host: self.host_label(),
                key: key.to_string(),
                status: "event carries no bucket".to_string(),
            })?;
        let store = self.store_for(bucket)?;
        let failed = |e: object_store::Error| SupervisorError::Download {
            host: self.host_label(),
            key: format!("{bucket}/{key}"),
            status: e.to_string(),
        };
        let bytes = store
            .get(&ObjectPath::from(key))
            .await
            .map_err(failed)?
            .bytes()
            .await
            .map_err(failed)?;

        let target = download_target(event, dest_dir);
        tokio::fs::write(&target, &bytes).await?;
        info!(
            provider = %self.record.provider_type,
            bucket,
            key,
            path = %target.display(),
            "Downloaded input object"
        );
        Ok(target)
    }

    async fn upload(&self, local_file: &Path, file_name: &str, destination_path: &str) -> Result<()> {
        let (bucket, key) = split_destination(destination_path, file_name);
        let failed = |reason: String| SupervisorError::Upload {
            destination: format!("{bucket}/{key}"),
            file: local_file.display().to_string(),
            reason,
        };
        if bucket.is_empty() {
            return Err(failed("output path has no bucket".to_string()));
        }
        let data = tokio::fs::read(local_file).await?;
        let store = self.store_for(&bucket)?;
        store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(data))
            .await
            .map_err(|e| failed(e.to_string()))?;
        info!(
            provider = %self.record.provider_type,
            bucket = %bucket,
            key = %key,
            "Uploaded output file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn minio(extra: &[(&str, &str)]) -> ObjectStorageBackend {
        let mut creds: BTreeMap<String, String> = [("access_key", "a"), ("secret_key", "s")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        creds.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        ObjectStorageBackend::new(AuthRecord::new(ProviderType::Minio, "default", creds).unwrap())
    }

    #[test]
    fn destination_splits_bucket_from_folder() {
        assert_eq!(
            split_destination("bucket/folder", "out.png"),
            ("bucket".to_string(), "folder/out.png".to_string())
        );
        assert_eq!(
            split_destination("/bucket/", "sub/out.png"),
            ("bucket".to_string(), "sub/out.png".to_string())
        );
        assert_eq!(
            split_destination("bucket/a/b", "out.png"),
            ("bucket".to_string(), "a/b/out.png".to_string())
        );
    }

    #[test]
    fn minio_uses_cluster_endpoint_by_default() {
        assert_eq!(minio(&[]).endpoint().as_deref(), Some(DEFAULT_MINIO_ENDPOINT));
        let custom = minio(&[("endpoint", "https://minio.example.org"), ("verify", "False")]);
        assert_eq!(custom.endpoint().as_deref(), Some("https://minio.example.org"));
        assert!(!custom.verify_tls());
    }

    #[test]
    fn ambient_s3_has_no_endpoint() {
        let backend = ObjectStorageBackend::new(AuthRecord::ambient_s3());
        assert_eq!(backend.endpoint(), None);
        assert_eq!(backend.kind(), "S3");
    }

    #[test]
    fn clients_are_cached_per_bucket() {
        let backend = minio(&[]);
        let first = backend.store_for("bucket").unwrap();
        let second = backend.store_for("bucket").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        backend.store_for("other").unwrap();
        assert_eq!(backend.stores.lock().unwrap().len(), 2);
    }
}
