//! Dependency scanning across a project's R sources.
//!
//! Every `.R`/`.Rmd` file (extension matched case-insensitively) is handed to a
//! [`DependencyExtractor`]; the per-script manifests are unioned. A script the
//! extractor chokes on is logged and contributes nothing.

mod flowr;
mod manifest;

pub use flowr::{flowr_input, parse_flowr_output, DependencyExtractor, ExtractError, FlowrExtractor};
pub use manifest::{parse_libraries, DependencyManifest};

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// True for `.R`, `.r`, `.Rmd` and `.rmd` files
pub fn is_analysis_script(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("r") || ext.eq_ignore_ascii_case("rmd"))
        .unwrap_or(false)
}

/// Every analysis script under `root`, hidden and ignored files included, sorted by path
pub fn find_analysis_scripts(root: &Path) -> Vec<PathBuf> {
    let mut scripts = Vec::new();

    for result in WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build()
    {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_analysis_script(entry.path()) {
            scripts.push(entry.into_path());
        }
    }

    scripts.sort();
    scripts
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub manifest: DependencyManifest,
    /// Scripts that were queried, successful or not
    pub scripts: Vec<PathBuf>,
    /// Scripts the extractor failed on, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

impl ScanReport {
    pub fn scanned_ok(&self) -> usize {
        self.scripts.len() - self.failures.len()
    }
}

pub struct DependencyScanner {
    extractor: Arc<dyn DependencyExtractor>,
}

impl DependencyScanner {
    pub fn new(extractor: Arc<dyn DependencyExtractor>) -> Self {
        Self { extractor }
    }

    /// Scans `source_dir`. Returns `None` when it holds no analysis scripts.
    pub async fn scan(&self, source_dir: &Path) -> Option<ScanReport> {
        let scripts = find_analysis_scripts(source_dir);
        if scripts.is_empty() {
            info!(path = %source_dir.display(), "No R or Rmd files found");
            return None;
        }

        info!(path = %source_dir.display(), scripts = scripts.len(), "Extracting dependencies");
        let mut report = ScanReport::default();

        for script in &scripts {
            match self.extractor.extract(source_dir, script).await {
                Ok(found) => {
                    debug!(
                        script = %script.display(),
                        libraries = found.libraries.len(),
                        "Dependencies extracted"
                    );
                    report.manifest.merge(found);
                }
                Err(e) => {
                    warn!(script = %script.display(), error = %e, "Dependency extraction failed");
                    report.failures.push((script.clone(), e.to_string()));
                }
            }
        }

        report.scripts = scripts;
        Some(report)
    }
}
