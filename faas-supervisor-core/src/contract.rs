//! # contract: the storage backend interface
//!
//! Every remote store (object storage, Onedata, WebDAV) and the local
//! filesystem fallback implement [`StorageBackend`]. The registry hands out
//! backends as `Arc<dyn StorageBackend>`, so the resolver and the dispatcher
//! never know which concrete client they talk to.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; with the `test-export-mocks` feature
//!   `MockStorageBackend` is available to integration tests and downstream
//!   crates, and can be registered into a `StorageRegistry` in place of a real
//!   client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::Result;
use crate::event::ParsedEvent;

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short label used in logs, e.g. `"MINIO"` or `"LOCAL"`.
    fn kind(&self) -> &'static str;

    /// Fetches the object the event refers to into `dest_dir` and returns the
    /// path of the written file.
    async fn download(&self, event: &ParsedEvent, dest_dir: &Path) -> Result<PathBuf>;

    /// Stores `local_file` under `destination_path`, naming it `file_name`.
    /// `file_name` may contain `/` when the file sits in a subdirectory of the
    /// output directory.
    async fn upload(&self, local_file: &Path, file_name: &str, destination_path: &str)
        -> Result<()>;
}
