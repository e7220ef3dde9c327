//! # upload: output dispatch
//!
//! Walks the output directory and pushes every file through the configured
//! output rules. A file matching several rules is uploaded once per rule.
//!
//! Rules are processed in order and files in sorted order. Resolving a rule's
//! backend fails the whole dispatch (bad destination configuration), while a
//! failed upload of one file is logged, recorded in the [`DispatchReport`] and
//! skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::OutputRule;
use crate::contract::StorageBackend;
use crate::error::Result;
use crate::registry::StorageRegistry;

#[derive(Debug, Default, Serialize)]
pub struct DispatchReport {
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub provider: String,
    pub destination_path: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub provider: String,
    pub destination_path: String,
    pub file_name: String,
    pub error: String,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A regular file below the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    /// Path relative to the output directory, `/`-separated.
    pub relative_name: String,
}

/// Lists every regular file under `dir`, recursively, sorted by relative name.
pub fn list_output_files(dir: &Path) -> Result<Vec<OutputFile>> {
    fn visit_dir(dir: &Path, root: &Path, results: &mut Vec<OutputFile>) -> Result<()> {
        for entry_res in std::fs::read_dir(dir)? {
            let entry = entry_res?;
            let path = entry.path();
            if path.is_dir() {
                visit_dir(&path, root, results)?;
            } else if path.is_file() {
                let Ok(rel_path) = path.strip_prefix(root) else {
                    continue;
                };
                let relative_name = rel_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                results.push(OutputFile {
                    path: path.clone(),
                    relative_name,
                });
            }
        }
        Ok(())
    }

    let mut results = Vec::new();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "Output directory does not exist");
        return Ok(results);
    }
    visit_dir(dir, dir, &mut results)?;
    results.sort_by(|a, b| a.relative_name.cmp(&b.relative_name));
    Ok(results)
}

/// Uploads the files of `output_dir` according to `rules`.
pub async fn dispatch_output(
    registry: &StorageRegistry,
    rules: &[OutputRule],
    output_dir: &Path,
) -> Result<DispatchReport> {
    let files = list_output_files(output_dir)?;
    info!(
        files = files.len(),
        rules = rules.len(),
        dir = %output_dir.display(),
        "[OUTPUT] Dispatching output files"
    );

    let mut report = DispatchReport::default();

    for rule in rules {
        let selector = rule.selector()?;
        let mut backend: Option<Arc<dyn StorageBackend>> = None;
        for file in files.iter().filter(|f| rule.matches(&f.relative_name)) {
            // resolved on first match; the registry memoises across rules
            if backend.is_none() {
                backend = Some(registry.resolve_selector(&selector)?);
            }
            let Some(target) = backend.as_ref() else {
                continue;
            };
            debug!(
                file = %file.relative_name,
                provider = %selector,
                path = %rule.path,
                "[OUTPUT] Uploading file"
            );
            match target
                .upload(&file.path, &file.relative_name, &rule.path)
                .await
            {
                Ok(()) => report.uploaded.push(UploadedFile {
                    provider: selector.to_string(),
                    destination_path: rule.path.clone(),
                    file_name: file.relative_name.clone(),
                }),
                Err(e) => {
                    error!(
                        error = %e,
                        file = %file.relative_name,
                        provider = %selector,
                        "[OUTPUT][ERROR] Upload failed, continuing"
                    );
                    report.failed.push(FailedUpload {
                        provider: selector.to_string(),
                        destination_path: rule.path.clone(),
                        file_name: file.relative_name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "[OUTPUT] Dispatch finished"
    );
    Ok(report)
}
