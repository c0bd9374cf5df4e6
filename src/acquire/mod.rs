//! Source acquisition: materialize `repos/<id>_repo/<id>_src` for a project.
//!
//! Order of preference:
//! 1. existing non-empty source directory (no network)
//! 2. cached `downloads/<id>.zip`
//! 3. OSF whole-project archive
//! 4. OSF folder traversal, packed into `downloads/<id>.zip` afterwards
//!
//! Whatever path is taken, a failed acquisition never leaves a populated source
//! directory behind, so the next attempt does not mistake it for a cache hit.

pub mod archive;
mod osf;
mod retry;

pub use osf::{NodeAttributes, OsfClient};
pub use retry::{Backoff, RetryPolicy};

use crate::layout::Workspace;
use crate::project::ProjectId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("rate limited by {url} after {attempts} attempt(s)")]
    RateLimited { url: String, attempts: u32 },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("no archive to restore from at {0}")]
    MissingArchive(PathBuf),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquireError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AcquireError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Source directory was already populated
    Cached(PathBuf),
    /// Extracted from an archive already present in `downloads/`
    Extracted(PathBuf),
    /// Archive downloaded from OSF, then extracted
    Downloaded { path: PathBuf, bytes: u64 },
    /// Archive endpoint refused; files fetched one by one
    Traversed { path: PathBuf, files: usize },
}

impl AcquireOutcome {
    pub fn path(&self) -> &Path {
        match self {
            AcquireOutcome::Cached(path) | AcquireOutcome::Extracted(path) => path,
            AcquireOutcome::Downloaded { path, .. } | AcquireOutcome::Traversed { path, .. } => path,
        }
    }

    pub fn used_network(&self) -> bool {
        matches!(
            self,
            AcquireOutcome::Downloaded { .. } | AcquireOutcome::Traversed { .. }
        )
    }
}

pub struct SourceAcquirer {
    workspace: Workspace,
    client: Arc<OsfClient>,
}

impl SourceAcquirer {
    pub fn new(workspace: Workspace, client: Arc<OsfClient>) -> Self {
        Self { workspace, client }
    }

    pub fn client(&self) -> &OsfClient {
        &self.client
    }

    pub async fn acquire(&self, id: &ProjectId) -> Result<AcquireOutcome, AcquireError> {
        let src = self.workspace.source_dir(id);
        if archive::is_populated(&src) {
            debug!(project = %id, path = %src.display(), "Source directory cached");
            return Ok(AcquireOutcome::Cached(src));
        }
        archive::remove_dir_if_exists(&src)?;

        let zip = self.workspace.archive_path(id);
        if zip.is_file() {
            extract_fresh(&zip, &src)?;
            return Ok(AcquireOutcome::Extracted(src));
        }

        match self.client.download_archive(id, &zip).await {
            Ok(bytes) => {
                if let Err(e) = extract_fresh(&zip, &src) {
                    // a body that is not a zip must not be replayed from cache next time
                    let _ = std::fs::remove_file(&zip);
                    return Err(e);
                }
                Ok(AcquireOutcome::Downloaded { path: src, bytes })
            }
            Err(AcquireError::Http { status, url }) => {
                warn!(
                    project = %id,
                    status,
                    url = %url,
                    "Archive endpoint refused, falling back to folder traversal"
                );
                let files = self.traverse_and_snapshot(id, &src, &zip).await?;
                Ok(AcquireOutcome::Traversed { path: src, files })
            }
            Err(e) => Err(e),
        }
    }

    async fn traverse_and_snapshot(
        &self,
        id: &ProjectId,
        src: &Path,
        zip: &Path,
    ) -> Result<usize, AcquireError> {
        let result = match self.client.download_tree(id, src).await {
            Ok(files) => archive::pack_directory(src, zip).map(|_| files),
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = archive::remove_dir_if_exists(src);
        }
        result
    }

    /// Downloads `downloads/<id>.zip` without extracting it. Returns false when
    /// the archive is already present.
    pub async fn prefetch(&self, id: &ProjectId) -> Result<bool, AcquireError> {
        let zip = self.workspace.archive_path(id);
        if zip.is_file() {
            debug!(project = %id, "Archive already downloaded");
            return Ok(false);
        }
        self.client.download_archive(id, &zip).await?;
        Ok(true)
    }

    pub fn restore(&self, id: &ProjectId) -> Result<usize, AcquireError> {
        restore_source(&self.workspace, id)
    }
}

fn extract_fresh(zip: &Path, src: &Path) -> Result<usize, AcquireError> {
    match archive::extract_archive(zip, src) {
        Ok(entries) => {
            info!(archive = %zip.display(), entries, "Project extracted");
            Ok(entries)
        }
        Err(e) => {
            let _ = archive::remove_dir_if_exists(src);
            Err(e)
        }
    }
}

/// Replaces the source tree with a fresh extraction of `downloads/<id>.zip`
pub fn restore_source(workspace: &Workspace, id: &ProjectId) -> Result<usize, AcquireError> {
    let zip = workspace.archive_path(id);
    if !zip.is_file() {
        return Err(AcquireError::MissingArchive(zip));
    }

    let src = workspace.source_dir(id);
    archive::remove_dir_if_exists(&src)?;
    archive::extract_archive(&zip, &src)
}
