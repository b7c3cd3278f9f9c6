use crate::error::AppError;
use log::warn;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::{Component, Path, PathBuf};

/// Characters left as-is when a file name is placed in an href.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Query key that asks for a folder as a ZIP archive.
pub const ARCHIVE_MARKER: &str = "zip";

// Percent-encodes one path segment (a file or folder name) for use in a link.
pub fn percent_encode_segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT).to_string()
}

/// Splits an HTTP request line into its method and target.
pub fn parse_request_line(request_line: &str) -> Result<(&str, &str), AppError> {
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/") => {
            Ok((method, target))
        }
        _ => Err(AppError::BadRequest),
    }
}

/// Separates the URL path from the query string, dropping any fragment.
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    let target = target.split('#').next().unwrap_or(target);
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// True when the query holds the archive marker with a non-empty value.
pub fn has_archive_marker(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| {
            let key = key.replace('+', " ");
            percent_decode_str(&key).decode_utf8_lossy() == ARCHIVE_MARKER && !value.is_empty()
        })
}

/// Maps a URL path onto the filesystem below `root`.
///
/// The path is percent-decoded and split into segments. Empty segments,
/// `.` and `..` are dropped, as is anything that would not stay a single
/// path component, so the result can never climb above `root`.
pub fn translate_path(root: &Path, url_path: &str) -> Result<PathBuf, AppError> {
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|_| AppError::BadRequest)?;
    if decoded.contains('\0') {
        return Err(AppError::BadRequest);
    }

    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        let mut components = Path::new(segment).components();
        if let (Some(Component::Normal(name)), None) = (components.next(), components.next()) {
            path.push(name);
        }
    }
    Ok(path)
}

/// Rejects paths that exist but resolve outside `root` (through a symlink).
///
/// `root` must already be canonical. Missing paths are let through; the
/// caller reports them as not found.
pub fn ensure_within_root(root: &Path, path: &Path) -> Result<(), AppError> {
    let canonical = match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => return Ok(()),
    };
    if canonical.starts_with(root) {
        Ok(())
    } else {
        warn!(
            "Potential path traversal attempt: '{}' resolves to '{}'",
            path.display(),
            canonical.display()
        );
        Err(AppError::Forbidden)
    }
}
