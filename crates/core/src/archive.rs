//! Packaging of the worker output tree into a single ZIP archive.
//!
//! Entry names are relative to the output directory, so the archive root is
//! the output directory itself. Entries are sorted and stamped with a fixed
//! timestamp, which makes the archive byte-for-byte reproducible for the
//! same output tree. Symbolic links are never followed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::PackagingError;

/// File name of the archive inside the session, also used as the download name.
pub const ARCHIVE_FILE_NAME: &str = "planos_marcados.zip";

/// Maximum deflate level.
const COMPRESSION_LEVEL: i64 = 9;

/// A written archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Entry names in archive order.
    pub entries: Vec<String>,
    pub size_bytes: u64,
}

/// Async wrapper around [`pack`], run on the blocking pool.
pub async fn pack_output(
    output_dir: &Path,
    archive_path: &Path,
) -> Result<ArchiveSummary, PackagingError> {
    let output_dir = output_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || pack(&output_dir, &archive_path))
        .await
        .map_err(|e| PackagingError::Task(e.to_string()))?
}

/// Write every regular file under `output_dir` into a ZIP at `archive_path`.
///
/// Fails with [`PackagingError::MissingOutput`] if `output_dir` is not a
/// directory and with [`PackagingError::EmptyOutput`] if it holds no regular
/// files. `archive_path` must lie outside `output_dir`.
pub fn pack(output_dir: &Path, archive_path: &Path) -> Result<ArchiveSummary, PackagingError> {
    match fs::symlink_metadata(output_dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(PackagingError::MissingOutput(output_dir.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PackagingError::MissingOutput(output_dir.to_path_buf()));
        }
        Err(e) => return Err(PackagingError::Io(e)),
    }

    let files = collect_files(output_dir)?;
    if files.is_empty() {
        return Err(PackagingError::EmptyOutput);
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(BufWriter::new(File::create(archive_path)?));
    for (name, path) in &files {
        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }
    let mut writer = zip.finish()?;
    writer.flush()?;

    let size_bytes = fs::metadata(archive_path)?.len();
    tracing::info!(
        path = %archive_path.display(),
        entries = files.len(),
        size_bytes,
        "Archive written",
    );

    Ok(ArchiveSummary {
        path: archive_path.to_path_buf(),
        entries: files.into_iter().map(|(name, _)| name).collect(),
        size_bytes,
    })
}

/// Regular files under `root` as `(entry_name, path)` pairs, sorted by name.
fn collect_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    collect_recursive(root, "", &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn collect_recursive(
    dir: &Path,
    prefix: &str,
    files: &mut Vec<(String, PathBuf)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let entry_name = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        // `DirEntry::file_type` does not follow symlinks.
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            tracing::warn!(entry = %entry_name, "Skipping symbolic link in worker output");
        } else if file_type.is_dir() {
            collect_recursive(&entry.path(), &entry_name, files)?;
        } else if file_type.is_file() {
            files.push((entry_name, entry.path()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
