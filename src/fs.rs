use crate::error::AppError;
use crate::templates::TemplateEngine;
use log::{debug, info};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Name of the file dropped into a freshly created share.
pub const PLACEHOLDER_FILE: &str = "test.txt";
const PLACEHOLDER_CONTENT: &str = "Hello from FileLinker!";

/// One direct child of a listed directory.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Reads the immediate entries of `path`, sorted by name.
///
/// Hidden files are included. Symlinks are followed to decide whether an
/// entry is a directory; a dangling link is listed as a file.
pub fn list_directory(path: &Path) -> Result<Vec<DirEntryInfo>, AppError> {
    debug!("Listing directory: '{}'", path.display());
    let not_found = |_: std::io::Error| AppError::NotFound("Directory not found".to_string());

    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(not_found)? {
        let entry = entry.map_err(not_found)?;
        let metadata = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(_) => entry.metadata().map_err(not_found)?,
        };

        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Base name of `path`, or `fallback` when `path` is the share root itself.
pub fn display_name(root: &Path, path: &Path, fallback: &str) -> String {
    let is_root = path
        .strip_prefix(root)
        .map(|rel| rel.as_os_str().is_empty())
        .unwrap_or(false);
    if is_root {
        return fallback.to_string();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

/// Renders the HTML listing page for `path`.
pub fn generate_directory_listing(
    root: &Path,
    path: &Path,
    root_title: &str,
) -> Result<String, AppError> {
    let entries = list_directory(path)?;
    let title = display_name(root, path, root_title);
    let is_root = path == root;

    TemplateEngine::new().render_directory_listing(&title, &entries, is_root)
}

/// Makes sure the share root exists.
///
/// A missing root is created together with a small placeholder file so the
/// first listing is not empty. Returns `true` when the directory was created.
pub fn ensure_root_directory(path: &Path) -> Result<bool, AppError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(AppError::DirectoryNotFound(path.display().to_string()));
        }
        return Ok(false);
    }

    fs::create_dir_all(path)?;
    fs::write(path.join(PLACEHOLDER_FILE), PLACEHOLDER_CONTENT)?;
    info!("Created folder '{}'", path.display());
    Ok(true)
}
