//! OSF project identifiers

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const IMAGE_PREFIX: &str = "repo2docker-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectIdError {
    #[error("project identifier is empty")]
    Empty,

    #[error("project identifier '{id}' contains invalid character {ch:?}")]
    InvalidCharacter { id: String, ch: char },
}

/// Opaque identifier of an OSF project (e.g. `abc12`).
///
/// Identifiers end up in file names and container names, so only ASCII
/// alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProjectIdError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ProjectIdError::Empty);
        }

        if let Some(ch) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ProjectIdError::InvalidCharacter {
                id: trimmed.to_string(),
                ch,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image reference produced by repo2docker for this project
    pub fn image_name(&self) -> String {
        format!("{}{}", IMAGE_PREFIX, self.0)
    }

    /// Container name; equal to the image name so at most one container per project is live
    pub fn container_name(&self) -> String {
        self.image_name()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectId {
    type Err = ProjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves a CLI input into project identifiers.
///
/// An existing file is read as newline-delimited identifiers (blank lines and
/// `#` comments ignored); anything else is treated as a single identifier.
pub fn read_project_ids(input: &str) -> Result<Vec<ProjectId>> {
    let path = Path::new(input);
    if !path.is_file() {
        return Ok(vec![ProjectId::new(input)?]);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read project list from {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(idx, line)| {
            ProjectId::new(line)
                .with_context(|| format!("{}:{}: invalid project id", path.display(), idx + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_ids() {
        assert_eq!(ProjectId::new("abc12").unwrap().as_str(), "abc12");
        assert_eq!(ProjectId::new("  x_y-z ").unwrap().as_str(), "x_y-z");
    }

    #[test]
    fn test_rejects_empty_and_path_like_ids() {
        assert_eq!(ProjectId::new("   "), Err(ProjectIdError::Empty));
        assert!(matches!(
            ProjectId::new("../etc"),
            Err(ProjectIdError::InvalidCharacter { ch: '.', .. })
        ));
        assert!(ProjectId::new("a b").is_err());
    }

    #[test]
    fn test_container_naming_is_deterministic() {
        let id = ProjectId::new("q7rvm").unwrap();
        assert_eq!(id.image_name(), "repo2docker-q7rvm");
        assert_eq!(id.container_name(), id.image_name());
    }

    #[test]
    fn test_read_single_id() {
        let ids = read_project_ids("abc12").unwrap();
        assert_eq!(ids, vec![ProjectId::new("abc12").unwrap()]);
    }

    #[test]
    fn test_read_ids_from_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ids.txt");
        fs::write(&file, "abc12\n\n# comment\n  def34  \n").unwrap();

        let ids = read_project_ids(file.to_str().unwrap()).unwrap();
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["abc12", "def34"]);
    }

    #[test]
    fn test_read_ids_reports_bad_line() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ids.txt");
        fs::write(&file, "abc12\nbad id\n").unwrap();

        let err = read_project_ids(file.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
