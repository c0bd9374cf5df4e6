//! Optional catalog of the scripts each project is expected to contain
//! (`metadata/project_id_r_code_file.csv`, columns `Project ID`, `R Code File`).

use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const PROJECT_COLUMN: &str = "Project ID";
const SCRIPT_COLUMN: &str = "R Code File";

/// What to do when the catalog has nothing usable for a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatalogPolicy {
    /// Run every discovered script and log a warning
    #[default]
    FallbackToAll,
    /// Run nothing and log a warning
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptCatalog {
    order: Vec<String>,
    scripts: HashMap<String, Vec<String>>,
}

impl ScriptCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open catalog {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| anyhow!("Catalog {} has no '{}' column", path.display(), name))
        };
        let project_col = column(PROJECT_COLUMN)?;
        let script_col = column(SCRIPT_COLUMN)?;

        let mut catalog = ScriptCatalog::default();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
            let (Some(project), Some(script)) = (record.get(project_col), record.get(script_col)) else {
                continue;
            };
            catalog.insert(project.trim(), script.trim());
        }
        Ok(catalog)
    }

    /// Like [`ScriptCatalog::load`], but a missing file is `None`
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn insert(&mut self, project: &str, script: &str) {
        if project.is_empty() || script.is_empty() {
            return;
        }
        if !self.scripts.contains_key(project) {
            self.order.push(project.to_string());
        }
        self.scripts
            .entry(project.to_string())
            .or_default()
            .push(script.to_string());
    }

    /// Project ids in first-appearance order
    pub fn project_ids(&self) -> &[String] {
        &self.order
    }

    pub fn scripts_for(&self, project: &str) -> &[String] {
        self.scripts.get(project).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSelection {
    /// Discovered scripts named in the catalog
    Matched(Vec<String>),
    /// Catalog unusable; every discovered script runs
    Fallback { scripts: Vec<String>, reason: String },
    /// Catalog unusable and the policy is strict
    Skipped { reason: String },
}

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_lowercase()
}

/// Keeps discovered scripts whose lowercase base name is listed in `expected`,
/// preserving discovery order
pub fn select_scripts(discovered: &[String], expected: &[String], policy: CatalogPolicy) -> CatalogSelection {
    let reason = if expected.is_empty() {
        "No catalog entries for this project".to_string()
    } else {
        let wanted: HashSet<String> = expected.iter().map(|e| base_name(e)).collect();
        let matched: Vec<String> = discovered
            .iter()
            .filter(|s| wanted.contains(&base_name(s)))
            .cloned()
            .collect();
        if !matched.is_empty() {
            return CatalogSelection::Matched(matched);
        }
        "None of the catalog's files were found inside the container".to_string()
    };

    match policy {
        CatalogPolicy::FallbackToAll => CatalogSelection::Fallback {
            scripts: discovered.to_vec(),
            reason,
        },
        CatalogPolicy::Strict => CatalogSelection::Skipped { reason },
    }
}
