//! Concrete [`StorageBackend`](crate::contract::StorageBackend) implementations.

pub mod local;
pub mod object_storage;
pub mod onedata;
pub mod webdav;

pub use local::LocalBackend;
pub use object_storage::ObjectStorageBackend;
pub use onedata::OnedataBackend;
pub use webdav::WebdavBackend;

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SupervisorError};
use crate::event::ParsedEvent;

/// Name under which a downloaded object is stored in the working directory.
/// Always a single file name inside `dest_dir`.
pub(crate) fn download_target(event: &ParsedEvent, dest_dir: &Path) -> PathBuf {
    let name = event
        .display_name
        .as_deref()
        .and_then(local_file_name)
        .or_else(|| event.object_key.as_deref().and_then(local_file_name))
        .unwrap_or("input");
    dest_dir.join(name)
}

/// Last normal component of a remote name; `None` for empty names or names
/// ending in `..`.
fn local_file_name(name: &str) -> Option<&str> {
    match Path::new(name).components().next_back()? {
        Component::Normal(part) => part.to_str().filter(|p| !p.is_empty()),
        _ => None,
    }
}

pub(crate) fn required_key<'a>(event: &'a ParsedEvent, host: &str) -> Result<&'a str> {
    event
        .object_key
        .as_deref()
        .ok_or_else(|| SupervisorError::Download {
            host: host.to_string(),
            key: String::new(),
            status: "event carries no object key".to_string(),
        })
}

/// Joins path segments with single slashes, dropping empty ones.
pub(crate) fn join_remote(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| SupervisorError::Config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawPayload;

    fn named(display_name: Option<&str>, object_key: Option<&str>) -> ParsedEvent {
        let mut event = ParsedEvent::unknown(RawPayload::Text(String::new()));
        event.display_name = display_name.map(str::to_string);
        event.object_key = object_key.map(str::to_string);
        event
    }

    #[test]
    fn download_target_stays_inside_dest_dir() {
        let dir = Path::new("/tmp/workdir");
        assert_eq!(
            download_target(&named(Some("/etc/passwd.txt"), None), dir),
            dir.join("passwd.txt")
        );
        assert_eq!(
            download_target(&named(Some("../../escape.txt"), None), dir),
            dir.join("escape.txt")
        );
        assert_eq!(
            download_target(&named(Some("space/.."), Some("in/img.png")), dir),
            dir.join("img.png")
        );
        assert_eq!(download_target(&named(Some(""), Some("folder/")), dir), dir.join("folder"));
        assert_eq!(download_target(&named(Some(".."), Some("/")), dir), dir.join("input"));
        assert_eq!(download_target(&named(None, None), dir), dir.join("input"));
    }

    #[test]
    fn join_remote_collapses_slashes() {
        assert_eq!(join_remote(&["/space/", "out/dir/", "a.txt"]), "space/out/dir/a.txt");
        assert_eq!(join_remote(&["space", "", "a.txt"]), "space/a.txt");
    }
}
