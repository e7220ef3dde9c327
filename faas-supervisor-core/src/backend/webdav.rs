//! WebDAV backend, used for dCache endpoints.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{download_target, http_client, join_remote, required_key};
use crate::auth::AuthRecord;
use crate::contract::StorageBackend;
use crate::error::{Result, SupervisorError};
use crate::event::ParsedEvent;

pub struct WebdavBackend {
    base_url: String,
    login: String,
    password: String,
    client: OnceCell<reqwest::Client>,
}

impl WebdavBackend {
    pub fn new(record: &AuthRecord) -> Self {
        let hostname = record.credential("hostname").unwrap_or_default();
        let base_url = if hostname.starts_with("http://") || hostname.starts_with("https://") {
            hostname.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", hostname.trim_end_matches('/'))
        };
        Self {
            base_url,
            login: record.credential("login").unwrap_or_default().to_string(),
            password: record.credential("password").unwrap_or_default().to_string(),
            client: OnceCell::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let client = self
            .client
            .get_or_try_init(|| async { http_client() })
            .await?;
        Ok(client
            .request(method, self.url(path))
            .basic_auth(&self.login, Some(&self.password)))
    }

    async fn collection_exists(&self, path: &str) -> Result<bool> {
        let propfind = Method::from_bytes(b"PROPFIND")
            .map_err(|e| SupervisorError::Config(e.to_string()))?;
        let resp = self
            .request(propfind, &format!("{path}/"))
            .await?
            .header("Depth", "0")
            .send()
            .await;
        Ok(matches!(resp, Ok(r) if r.status().is_success()))
    }

    /// Creates every missing collection along `path`, outermost first.
    async fn ensure_collections(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&[&current, segment]);
            if self.collection_exists(&current).await? {
                continue;
            }
            debug!(collection = %current, "Creating WebDAV collection");
            let mkcol =
                Method::from_bytes(b"MKCOL").map_err(|e| SupervisorError::Config(e.to_string()))?;
            let resp = self
                .request(mkcol, &format!("{current}/"))
                .await?
                .send()
                .await
                .map_err(|e| self.upload_error(&current, "", e.to_string()))?;
            // 405: created concurrently by someone else
            if !resp.status().is_success() && resp.status() != StatusCode::METHOD_NOT_ALLOWED {
                return Err(self.upload_error(&current, "", format!("status {}", resp.status())));
            }
        }
        Ok(())
    }

    fn upload_error(&self, destination: &str, file: &str, reason: String) -> SupervisorError {
        SupervisorError::Upload {
            destination: self.url(destination),
            file: file.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl StorageBackend for WebdavBackend {
    fn kind(&self) -> &'static str {
        "WEBDAV"
    }

    async fn download(&self, event: &ParsedEvent, dest_dir: &Path) -> Result<PathBuf> {
        let key = required_key(event, &self.base_url)?;
        let failed = |status: String| SupervisorError::Download {
            host: self.base_url.clone(),
            key: key.to_string(),
            status,
        };
        let resp = self
            .request(Method::GET, key)
            .await?
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(failed(format!("status {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| failed(e.to_string()))?;

        let target = download_target(event, dest_dir);
        tokio::fs::write(&target, &bytes).await?;
        info!(url = %self.url(key), path = %target.display(), "Downloaded WebDAV object");
        Ok(target)
    }

    async fn upload(&self, local_file: &Path, file_name: &str, destination_path: &str) -> Result<()> {
        let remote = join_remote(&[destination_path, file_name]);
        let folder = remote
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        self.ensure_collections(&folder).await?;

        let data = tokio::fs::read(local_file).await?;
        let file = local_file.display().to_string();
        let resp = self
            .request(Method::PUT, &remote)
            .await?
            .body(data)
            .send()
            .await
            .map_err(|e| self.upload_error(&remote, &file, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(self.upload_error(&remote, &file, format!("status {}", resp.status())));
        }
        info!(url = %self.url(&remote), "Uploaded output file over WebDAV");
        Ok(())
    }
}
