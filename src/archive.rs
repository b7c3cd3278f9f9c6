//! Packs a folder into a ZIP archive for download.
//!
//! The archive is written completely to a private temporary directory
//! before any byte is sent. The [`Archive`] handle owns that directory, so
//! it disappears once the handle is dropped: after the response has been
//! written, or as soon as building fails.

use crate::error::AppError;
use crate::fs::display_name;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A finished archive, ready to be streamed.
pub struct Archive {
    file_name: String,
    file: File,
    len: u64,
    workspace: TempDir,
}

impl Archive {
    /// Name offered to the client, e.g. `photos.zip`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Temporary directory holding the archive file.
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }
}

impl Read for Archive {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Builds a deflate-compressed archive of everything below `dir`.
///
/// Entries are stored relative to `dir`, so the archive root holds the
/// folder's contents. `fallback_name` names the archive when `dir` is the
/// share root. Files whose real location is outside `root` (reached
/// through a symlink) are left out.
pub fn build_archive(root: &Path, dir: &Path, fallback_name: &str) -> Result<Archive, AppError> {
    build_archive_in(root, dir, fallback_name, &std::env::temp_dir())
}

/// Like [`build_archive`], with the temporary workspace created below
/// `workspace_parent`.
pub fn build_archive_in(
    root: &Path,
    dir: &Path,
    fallback_name: &str,
    workspace_parent: &Path,
) -> Result<Archive, AppError> {
    if !dir.is_dir() {
        return Err(AppError::NotFound("Folder not found".to_string()));
    }
    let real_root = root
        .canonicalize()
        .map_err(|e| AppError::Archive(e.to_string()))?;

    let file_name = format!("{}.zip", display_name(root, dir, fallback_name));
    let workspace =
        tempfile::tempdir_in(workspace_parent).map_err(|e| AppError::Archive(e.to_string()))?;
    let archive_path = workspace.path().join(&file_name);

    let count = write_archive(&real_root, dir, &archive_path, workspace.path())?;

    let file = File::open(&archive_path).map_err(|e| AppError::Archive(e.to_string()))?;
    let len = file
        .metadata()
        .map_err(|e| AppError::Archive(e.to_string()))?
        .len();
    debug!(
        "Built '{}' from '{}': {} files, {} bytes",
        file_name,
        dir.display(),
        count,
        len
    );

    Ok(Archive {
        file_name,
        file,
        len,
        workspace,
    })
}

// Writes every file under `dir` into a new archive at `target`, returning
// the number of files stored. Anything under `skip` (the archive's own
// workspace, when the shared tree contains the temp directory) is left out,
// as is every file that does not resolve to a location inside `root`.
fn write_archive(root: &Path, dir: &Path, target: &Path, skip: &Path) -> Result<usize, AppError> {
    let out = File::create(target).map_err(|e| AppError::Archive(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let mut count = 0;
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(skip));
    for entry in walker {
        let entry = entry?;
        // Symlinked files are stored with their target's content.
        if !entry.path().is_file() {
            continue;
        }
        if !resolves_within(root, entry.path()) {
            warn!(
                "Leaving '{}' out of the archive: it points outside the shared folder",
                entry.path().display()
            );
            continue;
        }

        let name = archive_entry_name(dir, entry.path())?;
        zip.start_file(name, options)?;
        let mut source = File::open(entry.path())
            .map_err(|e| AppError::Archive(format!("{}: {e}", entry.path().display())))?;
        io::copy(&mut source, &mut zip).map_err(|e| AppError::Archive(e.to_string()))?;
        count += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer).map_err(|e| AppError::Archive(e.to_string()))?;
    Ok(count)
}

// Whether the real location of `path` lies inside `root` (already canonical).
fn resolves_within(root: &Path, path: &Path) -> bool {
    path.canonicalize()
        .map(|resolved| resolved.starts_with(root))
        .unwrap_or(false)
}

// Path of `path` relative to `dir`, joined with forward slashes.
fn archive_entry_name(dir: &Path, path: &Path) -> Result<String, AppError> {
    let relative = path
        .strip_prefix(dir)
        .map_err(|e| AppError::Archive(e.to_string()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
