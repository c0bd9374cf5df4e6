//! Fixed on-disk layout shared by every project.
//!
//! ```text
//! repos/<id>_repo/<id>_src/...     source tree (cache keyed by id)
//! repos/<id>_repo/dependencies.txt transient manifest
//! downloads/<id>.zip               pristine archive, replayed on restore
//! logs/<id>.log                    stage log
//! logs/<id>_execution.log          raw script output
//! logs/<id>_repo2docker.log        image build output
//! results/execution_results.csv    one row per executed script
//! metadata/project_id_r_code_file.csv  optional script catalog
//! ```

use crate::project::ProjectId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const LOGS_DIR: &str = "logs";
pub const REPOS_DIR: &str = "repos";
pub const RESULTS_DIR: &str = "results";
pub const DOWNLOADS_DIR: &str = "downloads";
pub const METADATA_DIR: &str = "metadata";

pub const RESULTS_FILE: &str = "execution_results.csv";
pub const CATALOG_FILE: &str = "project_id_r_code_file.csv";
pub const MANIFEST_FILE: &str = "dependencies.txt";

/// Mount point of the project directory inside the container
pub const CONTAINER_MOUNT: &str = "/data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the top-level directories if they are missing
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            LOGS_DIR,
            REPOS_DIR,
            RESULTS_DIR,
            DOWNLOADS_DIR,
            METADATA_DIR,
        ] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.root.join(REPOS_DIR).join(format!("{}_repo", id))
    }

    pub fn source_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(source_dir_name(id))
    }

    pub fn manifest_path(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join(MANIFEST_FILE)
    }

    pub fn archive_path(&self, id: &ProjectId) -> PathBuf {
        self.downloads_dir().join(format!("{}.zip", id))
    }

    pub fn project_log(&self, id: &ProjectId) -> PathBuf {
        self.logs_dir().join(format!("{}.log", id))
    }

    pub fn execution_log(&self, id: &ProjectId) -> PathBuf {
        self.logs_dir().join(format!("{}_execution.log", id))
    }

    pub fn build_log(&self, id: &ProjectId) -> PathBuf {
        self.logs_dir().join(format!("{}_repo2docker.log", id))
    }

    pub fn results_file(&self) -> PathBuf {
        self.results_dir().join(RESULTS_FILE)
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join(METADATA_DIR).join(CATALOG_FILE)
    }
}

/// Name of the source directory inside the project directory (`<id>_src`)
pub fn source_dir_name(id: &ProjectId) -> String {
    format!("{}_src", id)
}

/// Source directory as seen from inside the container
pub fn container_source_dir(id: &ProjectId) -> String {
    format!("{}/{}", CONTAINER_MOUNT, source_dir_name(id))
}
