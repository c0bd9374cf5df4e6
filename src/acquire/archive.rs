//! ZIP snapshots of project source trees.
//!
//! The archive in `downloads/<id>.zip` is the pristine copy of a project; the
//! execution engine replays it after every script so each one starts from the
//! same tree.

use super::AcquireError;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// True when `dir` exists and holds at least one entry
pub fn is_populated(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Extracts `archive` into `dest`, returning the number of entries.
/// Entry names escaping `dest` are rejected by the zip reader.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, AcquireError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let entries = zip.len();

    fs::create_dir_all(dest)?;
    zip.extract(dest)?;

    debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        entries,
        "Extracted archive"
    );
    Ok(entries)
}

/// Regular files under `root` as sorted `/`-separated relative paths
fn list_files(root: &Path) -> Result<Vec<(String, PathBuf)>, AcquireError> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.path().to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Packs every file under `src` into `archive` (written via a temp file)
pub fn pack_directory(src: &Path, archive: &Path) -> Result<usize, AcquireError> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }

    let files = list_files(src)?;
    let tmp = archive.with_extension("zip.part");
    {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(&tmp)?));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, path) in &files {
            writer.start_file(name.as_str(), options)?;
            let mut input = File::open(path)?;
            io::copy(&mut input, &mut writer)?;
        }
        writer.finish()?;
    }

    fs::rename(&tmp, archive)?;
    debug!(archive = %archive.display(), files = files.len(), "Packed source tree");
    Ok(files.len())
}

/// SHA-256 over relative paths and file contents; equal digests mean equal trees
pub fn tree_digest(root: &Path) -> Result<String, AcquireError> {
    let mut hasher = Sha256::new();
    for (name, path) in list_files(root)? {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        let mut input = File::open(&path)?;
        io::copy(&mut input, &mut hasher)?;
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}
