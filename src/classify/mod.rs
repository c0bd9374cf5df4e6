//! Failure classification and batch reports.
//!
//! After a project's scripts ran, every `Failed` row of the results table is
//! matched against the stderr captured in the execution log: a keyword list
//! decides between a container (environment) problem and a code problem, and
//! an ordered pattern table names the error. First match wins.

use crate::layout::Workspace;
use crate::project::ProjectId;
use crate::results::{ExecutionRecord, ExecutionStatus, ResultsTable};
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

pub const UNKNOWN_ERROR: &str = "Unknown Error";
/// Reason and message of successful rows
pub const NOT_APPLICABLE: &str = "-";

const HALT_MARKER: &str = "Execution halted";
const BUILD_SUCCESS_MARKER: &str = "Container built successfully";

pub const SUCCESSFUL_PROJECTS_FILE: &str = "successful_projects.csv";
pub const FAILED_PROJECTS_FILE: &str = "failed_projects.csv";
pub const MERGED_LOG_FILE: &str = "merged_logs.txt";

const CONTAINER_KEYWORDS: &[&str] = &[
    "unable to load shared object",
    "cannot open shared object file",
    "no package called",
    "lazy loading failed",
    "package or namespace load failed",
    "package installation failed",
    "missing package",
    "unable to start data viewer",
    "cairo error 'error while writing to output stream'",
    "package .* required by .* could not be found",
];

const FILE_PATH: &str = "Invalid File or Directory Path";
const MISSING_OBJECT: &str = "Missing Object or Function";
const SYNTAX: &str = "Syntax or Argument Error";
const MISSING_PACKAGE: &str = "Missing Package";
const INSTALL_FAILURE: &str = "Package Installation Failure";
const SYSTEM_DEPENDENCY: &str = "System-Level Dependency Missing";
const ENCODING: &str = "Encoding/String Handling Error";
const DATA_MISMATCH: &str = "Data Structure Mismatch";
const STAN: &str = "Modeling Package Error (Stan)";

/// Ordered `(pattern, label)` table
const ERROR_PATTERNS: &[(&str, &str)] = &[
    (r"error in file.*?: cannot open the connection", "File Read Error - Cannot Open Connection"),
    (r#"cannot open file .*\.r['"]?"#, FILE_PATH),
    (r"cannot open file .*?: No such file or directory", FILE_PATH),
    (r"cannot change working directory", FILE_PATH),
    (r"does not exist", MISSING_OBJECT),
    (r"unable to open file: .*? ", MISSING_OBJECT),
    (r#"object ['"].*?['"] not found"#, MISSING_OBJECT),
    (r"object '.*' not found", MISSING_OBJECT),
    (r"Failed to search directory .*no such file or directory", FILE_PATH),
    (r"Cannot find directory .*", FILE_PATH),
    (r"Error in setwd\(\) : argument .* is missing, with no default", SYNTAX),
    (r"character argument expected", SYNTAX),
    (r"unexpected", SYNTAX),
    (r"file choice cancelled", "File Selection Error"),
    (r"invalid argument", SYNTAX),
    (r"argument is of length zero", SYNTAX),
    (r"unable to load shared object", "Shared Library Load Error"),
    (r"lazy loading failed", INSTALL_FAILURE),
    (r"package or namespace load failed", INSTALL_FAILURE),
    (r"no package called ‘([^’]+)’", MISSING_PACKAGE),
    (r"Package [`‘']\w+[`’'] required for this function to work", MISSING_PACKAGE),
    (r"package [`‘'].*[`’'] required by [`‘'].*[`’'] could not be found", MISSING_PACKAGE),
    (r"unable to start data viewer", SYSTEM_DEPENDENCY),
    (r"cairo error 'error while writing to output stream'", SYSTEM_DEPENDENCY),
    (r#"could not find function ["']left_join["']"#, MISSING_OBJECT),
    (r#"could not find function ["'](\w+)["']"#, MISSING_OBJECT),
    (r"could not find function", MISSING_OBJECT),
    (r"rstudio not running", "RStudio Environment Error"),
    (r"invalid multibyte string", ENCODING),
    (r"dimnames.*not equal to array extent", DATA_MISMATCH),
    (r"run `set\.\w+\.folder\(<path>\)`", "Package Folder Configuration Required"),
    (
        r#"cannot open compressed file .*?['"], probable reason 'No such file or directory'"#,
        FILE_PATH,
    ),
    (
        r#"Error: Folder ".*" already exists\. Stopping here to avoid overwriting files\."#,
        FILE_PATH,
    ),
    (r"NA/NaN argument", SYNTAX),
    (r"NAs introduced by coercion", SYNTAX),
    (r"undefined columns selected", DATA_MISMATCH),
    (r"Can't select columns that don't exist\.", DATA_MISMATCH),
    (r"invalid multibyte character in parser", ENCODING),
    (r"Error: '.*' is not an exported object from 'namespace:.*'", MISSING_OBJECT),
    (r"unknown arguments:.*", SYNTAX),
    (r"unused argument \(.+\)", SYNTAX),
    (r"unable to install packages", INSTALL_FAILURE),
    (r"incompatible dimensions", DATA_MISMATCH),
    (r"object of type '.*' is not subsettable", DATA_MISMATCH),
    (r"semantic error in .*line \d+, column \d+", STAN),
    (r"ill-typed arguments supplied to function .*", STAN),
    (r"Error in stanc", STAN),
    (r"stan_model", STAN),
    (r"rstan version", STAN),
    (r"StanHeaders", STAN),
    (r#"could not find function ["']stanc["']"#, STAN),
    (r"can only print from a screen device", "PDF Generation Error - Requires Screen Device"),
    (r"number of items to replace is not a multiple of replacement length", DATA_MISMATCH),
    (r"HTTP status code 410", "External Dependency Missing"),
    (r"labels appear to be misencoded", ENCODING),
];

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("valid regex")
}

fn container_keywords() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| CONTAINER_KEYWORDS.iter().map(|k| case_insensitive(k)).collect())
}

fn error_patterns() -> &'static [(Regex, &'static str)] {
    static RE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RE.get_or_init(|| {
        ERROR_PATTERNS
            .iter()
            .map(|(pattern, label)| (case_insensitive(pattern), *label))
            .collect()
    })
}

/// Start of an execution-log entry naming a script, timestamp prefixes allowed
fn file_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:\[[^\]\n]*\] )*File: (.+)$").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ContainerIssue,
    CodeIssue,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ContainerIssue => "Container Issue",
            FailureReason::CodeIssue => "Code Issue",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub reason: FailureReason,
    pub message: String,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            reason: FailureReason::CodeIssue,
            message: UNKNOWN_ERROR.to_string(),
        }
    }
}

/// Classifies the stderr text of a failed script
pub fn classify_failure_text(text: &str) -> Classification {
    let reason = if container_keywords().iter().any(|re| re.is_match(text)) {
        FailureReason::ContainerIssue
    } else {
        FailureReason::CodeIssue
    };

    let message = error_patterns()
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());

    Classification { reason, message }
}

/// Text between the last `File:` entry naming `script` and the first
/// `Execution halted` inside that entry. `None` when the entry is missing or
/// never halted.
pub fn extract_failure_block(log: &str, script: &str) -> Option<String> {
    let entries: Vec<_> = file_entry().captures_iter(log).collect();

    let (index, caps) = entries
        .iter()
        .enumerate()
        .rev()
        .find(|(_, caps)| caps.get(1).map(|m| m.as_str().trim_end() == script).unwrap_or(false))?;

    let start = caps.get(0)?.end();
    let end = entries
        .get(index + 1)
        .and_then(|next| next.get(0))
        .map(|m| m.start())
        .unwrap_or(log.len());

    let block = &log[start..end];
    block
        .find(HALT_MARKER)
        .map(|halt| block[..halt].trim_start_matches('\n').to_string())
}

/// Fills in `Reason` and `Error Message` for one row
pub fn classify_record(record: &mut ExecutionRecord, execution_log: &str) {
    match record.status {
        ExecutionStatus::Successful => {
            record.reason = NOT_APPLICABLE.to_string();
            record.error_message = NOT_APPLICABLE.to_string();
        }
        ExecutionStatus::Failed => {
            let classification = extract_failure_block(execution_log, &record.script)
                .map(|block| classify_failure_text(&block))
                .unwrap_or_else(Classification::unknown);
            record.reason = classification.reason.as_str().to_string();
            record.error_message = classification.message;
        }
    }
}

/// Classifies every row of `id` and rewrites the table. Returns `None`
/// (table untouched) when the project has no execution log.
pub fn classify_project(workspace: &Workspace, id: &ProjectId) -> Result<Option<usize>> {
    let log_path = workspace.execution_log(id);
    if !log_path.is_file() {
        warn!(project = %id, path = %log_path.display(), "Execution log not found, skipping classification");
        return Ok(None);
    }
    let log = fs::read_to_string(&log_path)
        .with_context(|| format!("Failed to read {}", log_path.display()))?;

    let table = ResultsTable::new(workspace.results_file());
    let mut records = table.read_all()?;
    let mut classified = 0;
    for record in records.iter_mut().filter(|r| r.project_id == id.as_str()) {
        classify_record(record, &log);
        classified += 1;
    }

    if classified > 0 {
        table.rewrite(&records)?;
    }
    info!(project = %id, rows = classified, "Results classified");
    Ok(Some(classified))
}

/// Concatenates the execution logs of `ids` into `output`, each under a
/// `=== Project <id> Log ===` header. Returns how many logs were merged.
pub fn merge_logs(workspace: &Workspace, ids: &[ProjectId], output: &Path) -> Result<usize> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut merged = fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut count = 0;
    for id in ids {
        let path = workspace.execution_log(id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(project = %id, path = %path.display(), error = %e, "No execution log to merge");
                continue;
            }
        };
        write!(merged, "\n=== Project {} Log ===\n{}\n{}\n", id, content, "=".repeat(50))?;
        count += 1;
    }

    info!(output = %output.display(), merged = count, "Execution logs merged");
    Ok(count)
}

pub fn default_merged_log(workspace: &Workspace) -> PathBuf {
    workspace.logs_dir().join(MERGED_LOG_FILE)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

/// Splits `ids` by whether their project log records a successful image
/// build, writing `results/successful_projects.csv` and
/// `results/failed_projects.csv`
pub fn build_report(workspace: &Workspace, ids: &[ProjectId]) -> Result<BuildReport> {
    let mut report = BuildReport::default();
    for id in ids {
        let built = fs::read_to_string(workspace.project_log(id))
            .map(|log| log.contains(BUILD_SUCCESS_MARKER))
            .unwrap_or(false);
        if built {
            report.successful.push(id.to_string());
        } else {
            report.failed.push(id.to_string());
        }
    }

    let dir = workspace.results_dir();
    fs::create_dir_all(&dir)?;
    write_id_list(&dir.join(SUCCESSFUL_PROJECTS_FILE), &report.successful)?;
    write_id_list(&dir.join(FAILED_PROJECTS_FILE), &report.failed)?;

    info!(
        successful = report.successful.len(),
        failed = report.failed.len(),
        "Build report written"
    );
    Ok(report)
}

fn write_id_list(path: &Path, ids: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["Project ID"])?;
    for id in ids {
        writer.write_record([id.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use yare::parameterized;

    #[parameterized(
        missing_object = { "Error in eval(expr): object 'df' not found", "Code Issue", MISSING_OBJECT },
        missing_package = { "Error in library(lme4) : there is no package called ‘lme4’", "Container Issue", MISSING_PACKAGE },
        setwd = { "Error in setwd(\"C:/Users/me/project\") : cannot change working directory", "Code Issue", FILE_PATH },
        shared_object = { "unable to load shared object '/usr/lib/R/library/sf/libs/sf.so'", "Container Issue", "Shared Library Load Error" },
        stan = { "Error in stanc(file = file, model_code = model_code) : parser failed", "Code Issue", STAN },
        upper_case = { "ERROR: OBJECT 'X' NOT FOUND", "Code Issue", MISSING_OBJECT },
        unknown = { "Something strange happened", "Code Issue", UNKNOWN_ERROR },
        required_by = { "package ‘rlang’ 0.4.0 was found, but package ‘rlang’ required by ‘dplyr’ could not be found", "Container Issue", MISSING_PACKAGE },
    )]
    fn test_classify_failure_text(text: &str, reason: &str, message: &str) {
        let c = classify_failure_text(text);
        assert_eq!(c.reason.as_str(), reason);
        assert_eq!(c.message, message);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        // "does not exist" precedes the folder pattern in the table
        let c = classify_failure_text("Error: path 'out' does not exist; Cannot find directory out");
        assert_eq!(c.message, MISSING_OBJECT);
    }

    #[test]
    fn test_extract_failure_block_bounded_to_script_entry() {
        let log = "\
[2025-04-11 09:30:12] [abc12] [R EXECUTION] File: abc12_src/a.R
[2025-04-11 09:30:13] [abc12] [R EXECUTION] Execution Failed:
Error: object 'x' not found
Execution halted
[2025-04-11 09:30:13] [abc12] [R EXECUTION] ========================================
[2025-04-11 09:30:14] [abc12] [R EXECUTION] File: abc12_src/b.R
[2025-04-11 09:30:15] [abc12] [R EXECUTION] Execution Failed:
Error in library(sf) : there is no package called ‘sf’
Execution halted
";
        let a = extract_failure_block(log, "abc12_src/a.R").unwrap();
        assert!(a.contains("object 'x' not found"));
        assert!(!a.contains("sf"));

        let b = extract_failure_block(log, "abc12_src/b.R").unwrap();
        assert!(b.contains("no package called"));
    }

    #[test]
    fn test_extract_failure_block_matches_whole_name() {
        let log = "\
[2025-04-11 09:30:12] [abc12] [R EXECUTION] File: abc12_src/a.R
[2025-04-11 09:30:13] [abc12] [R EXECUTION] Execution Failed:
Error: object 'x' not found
Execution halted
[2025-04-11 09:30:13] [abc12] [R EXECUTION] ========================================
[2025-04-11 09:30:14] [abc12] [R EXECUTION] File: abc12_src/a.Rmd
[2025-04-11 09:30:15] [abc12] [R EXECUTION] Execution Failed:
Error in library(sf) : there is no package called ‘sf’
Execution halted
";
        let block = extract_failure_block(log, "abc12_src/a.R").unwrap();
        assert!(block.contains("object 'x' not found"));
        assert!(!block.contains("sf"));

        let mut record = ExecutionRecord::new("abc12", "abc12_src/a.R", ExecutionStatus::Failed);
        classify_record(&mut record, log);
        assert_eq!(record.reason, "Code Issue");
        assert_eq!(record.error_message, MISSING_OBJECT);

        let mut rmd = ExecutionRecord::new("abc12", "abc12_src/a.Rmd", ExecutionStatus::Failed);
        classify_record(&mut rmd, log);
        assert_eq!(rmd.reason, "Container Issue");
    }

    #[test]
    fn test_extract_failure_block_without_halt() {
        let log = "File: abc12_src/a.R\nExecution Failed:\nExecution timed out after 5 seconds\n========\nFile: abc12_src/b.R\nExecution halted\n";
        assert_eq!(extract_failure_block(log, "abc12_src/a.R"), None);
        assert_eq!(extract_failure_block(log, "abc12_src/missing.R"), None);
    }

    #[test]
    fn test_extract_uses_latest_entry() {
        let log = "File: p_src/a.R\nold failure\nExecution halted\nFile: p_src/a.R\nnew failure\nExecution halted\n";
        assert_eq!(extract_failure_block(log, "p_src/a.R").unwrap(), "new failure\n");
    }

    fn seed(ws: &Workspace, id: &ProjectId, rows: &[(&str, ExecutionStatus)], log: &str) {
        let table = ResultsTable::new(ws.results_file());
        for (script, status) in rows {
            table
                .append(&ExecutionRecord::new(id.as_str(), *script, *status))
                .unwrap();
        }
        fs::create_dir_all(ws.logs_dir()).unwrap();
        fs::write(ws.execution_log(id), log).unwrap();
    }

    #[test]
    fn test_classify_project_fills_columns() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let id = ProjectId::new("abc12").unwrap();
        let other = ExecutionRecord::new("zzz99", "zzz99_src/x.R", ExecutionStatus::Failed);
        ResultsTable::new(ws.results_file()).append(&other).unwrap();
        seed(
            &ws,
            &id,
            &[
                ("abc12_src/ok.R", ExecutionStatus::Successful),
                ("abc12_src/bad.R", ExecutionStatus::Failed),
                ("abc12_src/silent.R", ExecutionStatus::Failed),
            ],
            "File: abc12_src/ok.R\nExecution Successful:\n\nFile: abc12_src/bad.R\nExecution Failed:\nError in library(x) : there is no package called ‘x’\nExecution halted\nFile: abc12_src/silent.R\nExecution Failed:\nkilled\n",
        );

        assert_eq!(classify_project(&ws, &id).unwrap(), Some(3));

        let rows = ResultsTable::new(ws.results_file()).read_all().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].reason, "");
        assert_eq!((rows[1].reason.as_str(), rows[1].error_message.as_str()), ("-", "-"));
        assert_eq!(rows[2].reason, "Container Issue");
        assert_eq!(rows[2].error_message, MISSING_PACKAGE);
        assert_eq!(rows[3].reason, "Code Issue");
        assert_eq!(rows[3].error_message, UNKNOWN_ERROR);
    }

    #[test]
    fn test_classify_project_without_log_is_noop() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let id = ProjectId::new("abc12").unwrap();
        assert_eq!(classify_project(&ws, &id).unwrap(), None);
        assert!(!ws.results_file().exists());
    }

    #[test]
    fn test_merge_logs() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let a = ProjectId::new("aaa11").unwrap();
        let b = ProjectId::new("bbb22").unwrap();
        fs::create_dir_all(ws.logs_dir()).unwrap();
        fs::write(ws.execution_log(&a), "first").unwrap();

        let out = default_merged_log(&ws);
        assert_eq!(merge_logs(&ws, &[a, b], &out).unwrap(), 1);
        let merged = fs::read_to_string(out).unwrap();
        assert_eq!(merged, format!("\n=== Project aaa11 Log ===\nfirst\n{}\n", "=".repeat(50)));
    }

    #[test]
    fn test_build_report() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let built = ProjectId::new("aaa11").unwrap();
        let broken = ProjectId::new("bbb22").unwrap();
        fs::create_dir_all(ws.logs_dir()).unwrap();
        fs::write(
            ws.project_log(&built),
            "[2025-01-01 00:00:00] [aaa11] [CONTAINER BUILD] ✅ Container built successfully.\n",
        )
        .unwrap();
        fs::write(ws.project_log(&broken), "build failed\n").unwrap();

        let report = build_report(&ws, &[built, broken]).unwrap();
        assert_eq!(report.successful, vec!["aaa11"]);
        assert_eq!(report.failed, vec!["bbb22"]);

        let failed = fs::read_to_string(ws.results_dir().join(FAILED_PROJECTS_FILE)).unwrap();
        assert_eq!(failed, "Project ID\nbbb22\n");
    }
}
