use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contract::StorageBackend;
use crate::error::Result;
use crate::event::ParsedEvent;

/// Fallback backend used when no remote provider applies: the event itself is
/// the input file, and nothing is uploaded.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "LOCAL"
    }

    async fn download(&self, event: &ParsedEvent, dest_dir: &Path) -> Result<PathBuf> {
        let path = dest_dir.join(format!("event-file-{}", Uuid::new_v4()));
        let bytes = event.raw.to_bytes()?;
        tokio::fs::write(&path, &bytes).await?;
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            provenance = event.provenance.as_str(),
            "Persisted event payload as input file"
        );
        Ok(path)
    }

    async fn upload(&self, local_file: &Path, file_name: &str, destination_path: &str) -> Result<()> {
        debug!(
            file = %local_file.display(),
            file_name,
            destination_path,
            "Local backend does not upload"
        );
        Ok(())
    }
}
