//! Onedata backend talking CDMI to a Oneprovider.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{download_target, http_client, join_remote, required_key};
use crate::auth::AuthRecord;
use crate::contract::StorageBackend;
use crate::error::{Result, SupervisorError};
use crate::event::ParsedEvent;

const AUTH_HEADER: &str = "X-Auth-Token";
const CDMI_VERSION_HEADER: &str = "X-CDMI-Specification-Version";
const CDMI_VERSION: &str = "1.1.1";
const CDMI_CONTAINER: &str = "application/cdmi-container";

pub struct OnedataBackend {
    host: String,
    token: String,
    space: String,
    client: OnceCell<reqwest::Client>,
}

impl OnedataBackend {
    pub fn new(record: &AuthRecord) -> Self {
        Self {
            host: record.credential("oneprovider_host").unwrap_or_default().to_string(),
            token: record.credential("token").unwrap_or_default().to_string(),
            space: record.credential("space").unwrap_or_default().to_string(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client.get_or_try_init(|| async { http_client() }).await
    }

    /// `https://<host>/cdmi/<path>`.
    pub fn cdmi_url(&self, path: &str) -> String {
        format!("https://{}/cdmi/{}", self.host, path.trim_start_matches('/'))
    }

    async fn container_exists(&self, path: &str) -> Result<bool> {
        let url = format!("{}/", self.cdmi_url(path));
        let resp = self
            .client()
            .await?
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .header(CDMI_VERSION_HEADER, CDMI_VERSION)
            .send()
            .await;
        Ok(matches!(resp, Ok(r) if r.status().is_success()))
    }

    /// Creates every missing container along `path`, outermost first.
    async fn ensure_containers(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&[&current, segment]);
            let full = join_remote(&[&self.space, &current]);
            if self.container_exists(&full).await? {
                continue;
            }
            debug!(container = %full, "Creating Onedata container");
            let url = format!("{}/", self.cdmi_url(&full));
            let resp = self
                .client()
                .await?
                .put(&url)
                .header(AUTH_HEADER, &self.token)
                .header(CDMI_VERSION_HEADER, CDMI_VERSION)
                .header(reqwest::header::CONTENT_TYPE, CDMI_CONTAINER)
                .send()
                .await
                .map_err(|e| self.upload_error(&full, "", e.to_string()))?;
            if !accepted(resp.status()) {
                return Err(self.upload_error(&full, "", format!("status {}", resp.status())));
            }
        }
        Ok(())
    }

    fn upload_error(&self, destination: &str, file: &str, reason: String) -> SupervisorError {
        SupervisorError::Upload {
            destination: format!("{}:{}", self.host, destination),
            file: file.to_string(),
            reason,
        }
    }
}

fn accepted(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
    )
}

#[async_trait]
impl StorageBackend for OnedataBackend {
    fn kind(&self) -> &'static str {
        "ONEDATA"
    }

    async fn download(&self, event: &ParsedEvent, dest_dir: &Path) -> Result<PathBuf> {
        let key = required_key(event, &self.host)?;
        let url = self.cdmi_url(key);
        let failed = |status: String| SupervisorError::Download {
            host: self.host.clone(),
            key: key.to_string(),
            status,
        };
        let resp = self
            .client()
            .await?
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if resp.status() != StatusCode::OK {
            return Err(failed(format!("status {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| failed(e.to_string()))?;

        let target = download_target(event, dest_dir);
        tokio::fs::write(&target, &bytes).await?;
        info!(host = %self.host, key, path = %target.display(), "Downloaded Onedata object");
        Ok(target)
    }

    async fn upload(&self, local_file: &Path, file_name: &str, destination_path: &str) -> Result<()> {
        let remote = join_remote(&[&self.space, destination_path, file_name]);
        let folder = join_remote(&[destination_path, file_name])
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        self.ensure_containers(&folder).await?;

        let data = tokio::fs::read(local_file).await?;
        let file = local_file.display().to_string();
        let resp = self
            .client()
            .await?
            .put(self.cdmi_url(&remote))
            .header(AUTH_HEADER, &self.token)
            .body(data)
            .send()
            .await
            .map_err(|e| self.upload_error(&remote, &file, e.to_string()))?;
        if !accepted(resp.status()) {
            return Err(self.upload_error(&remote, &file, format!("status {}", resp.status())));
        }
        info!(host = %self.host, remote = %remote, "Uploaded output file to Onedata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn backend() -> OnedataBackend {
        let creds = BTreeMap::from([
            ("oneprovider_host".to_string(), "op.example.org".to_string()),
            ("token".to_string(), "tok".to_string()),
            ("space".to_string(), "space_ok".to_string()),
        ]);
        let record = AuthRecord::new(crate::auth::ProviderType::Onedata, "default", creds).unwrap();
        OnedataBackend::new(&record)
    }

    #[test]
    fn cdmi_urls() {
        let b = backend();
        assert_eq!(
            b.cdmi_url("/space_ok/in/file.txt"),
            "https://op.example.org/cdmi/space_ok/in/file.txt"
        );
        assert_eq!(b.cdmi_url("space_ok/out"), "https://op.example.org/cdmi/space_ok/out");
    }

    #[test]
    fn accepted_statuses() {
        assert!(accepted(StatusCode::CREATED));
        assert!(accepted(StatusCode::NO_CONTENT));
        assert!(!accepted(StatusCode::OK));
        assert!(!accepted(StatusCode::FORBIDDEN));
    }
}
