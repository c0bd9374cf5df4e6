use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

const LIBRARIES_HEADER: &str = "# R libraries";
const SOURCED_HEADER: &str = "# Sourced files";
const READ_HEADER: &str = "# Data read";
const WRITTEN_HEADER: &str = "# Data written";

/// Union of everything the project's scripts load, source, read or write.
///
/// All four categories are sets, so merging is commutative and idempotent and
/// the rendered file does not depend on the order scripts were scanned in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    pub libraries: BTreeSet<String>,
    pub sourced_files: BTreeSet<String>,
    pub read_data: BTreeSet<String>,
    pub written_data: BTreeSet<String>,
}

impl DependencyManifest {
    pub fn merge(&mut self, other: DependencyManifest) {
        self.libraries.extend(other.libraries);
        self.sourced_files.extend(other.sourced_files);
        self.read_data.extend(other.read_data);
        self.written_data.extend(other.written_data);
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
            && self.sourced_files.is_empty()
            && self.read_data.is_empty()
            && self.written_data.is_empty()
    }

    /// `dependencies.txt` format. The libraries section is always present;
    /// the others only when non-empty.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(LIBRARIES_HEADER);
        out.push('\n');
        push_lines(&mut out, &self.libraries);

        for (header, entries) in [
            (SOURCED_HEADER, &self.sourced_files),
            (READ_HEADER, &self.read_data),
            (WRITTEN_HEADER, &self.written_data),
        ] {
            if !entries.is_empty() {
                out.push('\n');
                out.push_str(header);
                out.push('\n');
                push_lines(&mut out, entries);
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())
    }
}

fn push_lines(out: &mut String, entries: &BTreeSet<String>) {
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
}

/// Library names listed between `# R libraries` and the next `#` header
pub fn parse_libraries(content: &str) -> Vec<String> {
    let mut in_section = false;
    let mut libraries = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.starts_with(LIBRARIES_HEADER) {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if line.starts_with('#') {
            break;
        }
        if !line.is_empty() {
            libraries.push(line.to_string());
        }
    }

    libraries
}
