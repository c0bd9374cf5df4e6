//! repo2docker environment files.
//!
//! Consumes `dependencies.txt` exactly once: its library section becomes the
//! `Imports:` of a generated `DESCRIPTION`, a `postBuild` script installs the
//! pinned `remotes` and the flowR addin, and a `README.md` records where the
//! project came from.

use crate::acquire::OsfClient;
use crate::layout::{source_dir_name, MANIFEST_FILE};
use crate::project::ProjectId;
use crate::scan::parse_libraries;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const DESCRIPTION_FILE: &str = "DESCRIPTION";
pub const POST_BUILD_FILE: &str = "postBuild";
pub const README_FILE: &str = "README.md";

const NO_DESCRIPTION: &str = "No description provided.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub title: String,
    pub description: String,
}

impl ProjectMetadata {
    /// Used when the metadata service cannot be reached
    pub fn placeholder(id: &ProjectId) -> Self {
        Self {
            title: format!("osf_{}", id),
            description: NO_DESCRIPTION.to_string(),
        }
    }
}

/// Source of the human-readable project title and description
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn project_metadata(&self, id: &ProjectId) -> Result<ProjectMetadata>;
}

#[async_trait]
impl MetadataSource for OsfClient {
    async fn project_metadata(&self, id: &ProjectId) -> Result<ProjectMetadata> {
        let attributes = self.node_attributes(id).await?;
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        Ok(ProjectMetadata {
            title: non_blank(attributes.title).unwrap_or_else(|| format!("osf_{}", id)),
            description: non_blank(attributes.description)
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        })
    }
}

pub fn render_description(libraries: &[String]) -> String {
    let mut out = String::from(
        "Package: repo2dockerProject\n\
         Type: Package\n\
         Title: Repo2Docker Project\n\
         Version: 1.0\n\
         Authors@R: c(person(\"Maintainer\", \"Example\", email = \"maintainer@example.com\", role = c(\"aut\", \"cre\")))\n\
         Description: Automatically generated DESCRIPTION file for Repo2Docker.\n\
         License: MIT\n\
         Imports: ",
    );
    for library in libraries {
        out.push_str(library);
        out.push_str(", ");
    }
    out.push('\n');
    out
}

pub fn render_post_build() -> String {
    concat!(
        "#!/bin/bash\n",
        "\n",
        "# Install R-remotes version 2.5.0\n",
        "R -e \"install.packages('remotes', repos = 'http://cran.us.r-project.org', type = 'source')\"\n",
        "R -e \"remotes::install_version('remotes', version = '2.5.0', repos = 'http://cran.us.r-project.org')\"\n",
        "\n",
        "# Install FlowR\n",
        "R -e \"remotes::install_github('flowr-analysis/rstudio-addin-flowr')\"\n",
    )
    .to_string()
}

pub fn render_readme(id: &ProjectId, metadata: &ProjectMetadata) -> String {
    let image = id.image_name();
    format!(
        "# Automated reproducibility test for the OSF project, {id}\n\n\
         --- \n\
         ## OSF Project metadata: \n\
         {title}\n\n\
         {description}\n\n\
         --- \n\
         This repository was auto-generated as part of testing reproducibility of open science \
         projects hosted on OSF. Original OSF page: [https://osf.io/{id}/](https://osf.io/{id}/)\n\n\
         The contents of the folder {src} were downloaded from the OSF project. The files \
         DESCRIPTION and postBuild were added automatically to make this project Binder ready.\n\n\
         ## Start Container Locally\n\
         ```bash\n\
         repo2docker --image-name {image} .\n\
         docker run -p 8888:8888 --name {image}-test -d {image}\n\
         ```\n",
        id = id,
        title = metadata.title,
        description = metadata.description,
        src = source_dir_name(id),
        image = image,
    )
}

/// Writes `DESCRIPTION`, `postBuild` and `README.md` into `project_dir` and
/// removes `dependencies.txt`. Returns `Ok(false)` when there is no manifest
/// to consume.
pub async fn write_descriptor(
    project_dir: &Path,
    id: &ProjectId,
    metadata: &dyn MetadataSource,
) -> Result<bool> {
    let manifest_path = project_dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        warn!(
            project = %id,
            path = %manifest_path.display(),
            "No dependencies.txt found, skipping descriptor setup"
        );
        return Ok(false);
    }

    let manifest = fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
    let libraries = parse_libraries(&manifest);

    let description_path = project_dir.join(DESCRIPTION_FILE);
    fs::write(&description_path, render_description(&libraries))
        .with_context(|| format!("Failed to write {}", description_path.display()))?;

    fs::remove_file(&manifest_path)
        .with_context(|| format!("Failed to remove {}", manifest_path.display()))?;

    let post_build_path = project_dir.join(POST_BUILD_FILE);
    fs::write(&post_build_path, render_post_build())
        .with_context(|| format!("Failed to write {}", post_build_path.display()))?;
    make_executable(&post_build_path)?;

    let project_metadata = match metadata.project_metadata(id).await {
        Ok(m) => m,
        Err(e) => {
            warn!(project = %id, error = %e, "Failed to fetch project metadata, using placeholder README content");
            ProjectMetadata::placeholder(id)
        }
    };
    let readme_path = project_dir.join(README_FILE);
    fs::write(&readme_path, render_readme(id, &project_metadata))
        .with_context(|| format!("Failed to write {}", readme_path.display()))?;

    info!(project = %id, libraries = libraries.len(), "repo2docker files written");
    Ok(true)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
