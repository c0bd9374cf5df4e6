//! Global results table (`results/execution_results.csv`).
//!
//! Rows are appended by the execution engine with empty `Reason` and
//! `Error Message` columns; the classifier fills those in afterwards by
//! rewriting the whole table.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const HEADER: [&str; 5] = [
    "Project ID",
    "R/Rmd Script",
    "Execution Status",
    "Reason",
    "Error Message",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Successful,
    Failed,
}

impl ExecutionStatus {
    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            ExecutionStatus::Successful
        } else {
            ExecutionStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Successful => "Successful",
            ExecutionStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "successful" => Ok(ExecutionStatus::Successful),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub project_id: String,
    pub script: String,
    pub status: ExecutionStatus,
    pub reason: String,
    pub error_message: String,
}

impl ExecutionRecord {
    /// Fresh row as appended by the engine; classification columns empty
    pub fn new(project_id: impl Into<String>, script: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            project_id: project_id.into(),
            script: script.into(),
            status,
            reason: String::new(),
            error_message: String::new(),
        }
    }

    fn to_row(&self) -> [&str; 5] {
        [
            self.project_id.as_str(),
            self.script.as_str(),
            self.status.as_str(),
            self.reason.as_str(),
            self.error_message.as_str(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ResultsTable {
    path: PathBuf,
}

impl ResultsTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, writing the header first when the table is new
    pub fn append(&self, record: &ExecutionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open results table {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.write_record(record.to_row())?;
        writer.flush()?;
        Ok(())
    }

    /// Reads every row. A missing table is empty; short legacy rows are padded.
    pub fn read_all(&self) -> Result<Vec<ExecutionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open results table {}", self.path.display()))?;

        let mut records = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Malformed row {} in {}", idx + 2, self.path.display()))?;
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if row.len() < 3 {
                bail!(
                    "Row {} in {} has {} columns, expected at least 3",
                    idx + 2,
                    self.path.display(),
                    row.len()
                );
            }

            let status = row[2]
                .parse::<ExecutionStatus>()
                .map_err(|e| anyhow::anyhow!("Row {} in {}: {}", idx + 2, self.path.display(), e))?;

            records.push(ExecutionRecord {
                project_id: row[0].to_string(),
                script: row[1].to_string(),
                status,
                reason: row.get(3).unwrap_or("").to_string(),
                error_message: row.get(4).unwrap_or("").to_string(),
            });
        }

        Ok(records)
    }

    pub fn rows_for(&self, project_id: &str) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect())
    }

    /// Replaces the table contents through a sibling temp file and rename
    pub fn rewrite(&self, records: &[ExecutionRecord]) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            writer.write_record(HEADER)?;
            for record in records {
                writer.write_record(record.to_row())?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace results table {}", self.path.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> ResultsTable {
        ResultsTable::new(dir.path().join("results").join("execution_results.csv"))
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "Successful".parse::<ExecutionStatus>(),
            Ok(ExecutionStatus::Successful)
        );
        assert_eq!("FAILED".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Failed));
        assert!("Skipped".parse::<ExecutionStatus>().is_err());
        assert_eq!(ExecutionStatus::from_exit_code(0), ExecutionStatus::Successful);
        assert_eq!(ExecutionStatus::from_exit_code(137), ExecutionStatus::Failed);
    }

    #[test]
    fn test_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(table(&dir).read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let results = table(&dir);

        results
            .append(&ExecutionRecord::new("abc12", "abc12_src/a.R", ExecutionStatus::Successful))
            .unwrap();
        results
            .append(&ExecutionRecord::new("abc12", "abc12_src/b.R", ExecutionStatus::Failed))
            .unwrap();

        let content = fs::read_to_string(results.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Project ID,R/Rmd Script,Execution Status,Reason,Error Message"
        );
        assert_eq!(lines[1], "abc12,abc12_src/a.R,Successful,,");

        let rows = results.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_reads_legacy_three_column_rows() {
        let dir = TempDir::new().unwrap();
        let results = table(&dir);
        fs::create_dir_all(results.path().parent().unwrap()).unwrap();
        fs::write(
            results.path(),
            "Project ID,R/Rmd Script,Execution Status\nabc12,abc12_src/a.R,Failed\n",
        )
        .unwrap();

        let rows = results.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "");
        assert_eq!(rows[0].error_message, "");
    }

    #[test]
    fn test_rewrite_replaces_rows() {
        let dir = TempDir::new().unwrap();
        let results = table(&dir);
        results
            .append(&ExecutionRecord::new("abc12", "abc12_src/a.R", ExecutionStatus::Failed))
            .unwrap();

        let mut rows = results.read_all().unwrap();
        rows[0].reason = "Code Issue".to_string();
        rows[0].error_message = "Missing Object or Function".to_string();
        results.rewrite(&rows).unwrap();

        let reread = results.read_all().unwrap();
        assert_eq!(reread, rows);
        assert!(!results.path().with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_rows_for_filters_by_project() {
        let dir = TempDir::new().unwrap();
        let results = table(&dir);
        for (id, script) in [("aaaaa", "a.R"), ("bbbbb", "b.R"), ("aaaaa", "c.R")] {
            results
                .append(&ExecutionRecord::new(id, script, ExecutionStatus::Successful))
                .unwrap();
        }

        let rows = results.rows_for("aaaaa").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.project_id == "aaaaa"));
    }

    #[test]
    fn test_scripts_with_commas_are_quoted() {
        let dir = TempDir::new().unwrap();
        let results = table(&dir);
        results
            .append(&ExecutionRecord::new("abc12", "abc12_src/a, b.R", ExecutionStatus::Failed))
            .unwrap();

        let rows = results.read_all().unwrap();
        assert_eq!(rows[0].script, "abc12_src/a, b.R");
    }
}
