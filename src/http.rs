use crate::archive::build_archive;
use crate::error::AppError;
use crate::fs::generate_directory_listing;
use crate::response::{
    content_disposition, create_error_response, create_redirect_response, get_mime_type,
    http_date, HttpResponse,
};
use crate::utils::{
    ensure_within_root, has_archive_marker, parse_request_line, split_target, translate_path,
};
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{prelude::*, BufReader, ErrorKind};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// Longest request or header line accepted, in bytes.
pub const MAX_LINE_LENGTH: usize = 8192;
const MAX_HEADER_LINES: usize = 100;

/// Read-only settings shared by every worker.
#[derive(Debug, Clone)]
pub struct ServeContext {
    /// Canonical share root.
    pub root: PathBuf,
    pub chunk_size: usize,
    /// Listing title for the root itself.
    pub title: String,
    /// Archive base name for the root itself.
    pub archive_name: String,
}

/// What a request asks for, decided before anything is read from disk.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Archive(PathBuf),
    File(PathBuf),
    Directory(PathBuf),
}

/// Classifies a request target.
///
/// The archive marker wins regardless of what the path names; otherwise an
/// existing regular file is transferred and everything else is treated as
/// a directory listing.
pub fn classify(root: &Path, target: &str) -> Result<Route, AppError> {
    let (url_path, query) = split_target(target);
    let path = translate_path(root, url_path)?;
    ensure_within_root(root, &path)?;

    if has_archive_marker(query) {
        Ok(Route::Archive(path))
    } else if path.is_file() {
        Ok(Route::File(path))
    } else {
        Ok(Route::Directory(path))
    }
}

/// Handles a single client connection.
///
/// Every request-level failure is turned into an error response here; only
/// failures to talk to the client are returned.
pub fn handle_client(
    mut stream: TcpStream,
    ctx: &ServeContext,
    log_prefix: &str,
) -> Result<(), AppError> {
    let request_line = match read_request(&stream) {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!("{log_prefix} Connection closed before a request was sent");
            return Ok(());
        }
        Err(AppError::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            debug!("{log_prefix} Connection idle for too long, closing");
            return Ok(());
        }
        Err(AppError::Io(e)) => return Err(AppError::Io(e)),
        Err(e) => {
            warn!("{log_prefix} Unreadable request: {e}");
            return create_error_response(&e).send(&mut stream, ctx.chunk_size, log_prefix);
        }
    };
    debug!("{log_prefix} Request line: {request_line}");

    let response = match respond(&request_line, ctx, log_prefix) {
        Ok(response) => response,
        Err(e) => {
            let (status, _) = e.status();
            if status >= 500 {
                error!("{log_prefix} {request_line} -> {status}: {e}");
            } else {
                warn!("{log_prefix} {request_line} -> {status}: {e}");
            }
            create_error_response(&e)
        }
    };

    info!("{} {} -> {}", log_prefix, request_line, response.status_code);
    response.send(&mut stream, ctx.chunk_size, log_prefix)
}

/// Reads the request line and drains the headers. `None` when the client
/// hung up without sending anything.
///
/// Lines longer than [`MAX_LINE_LENGTH`], too many headers or a request line
/// that is not UTF-8 are `BadRequest`. Header contents are not interpreted.
pub fn read_request<R: Read>(stream: R) -> Result<Option<String>, AppError> {
    let mut reader = BufReader::new(stream);

    let request_line = match read_line(&mut reader)? {
        Some(line) => String::from_utf8(line).map_err(|_| AppError::BadRequest)?,
        None => return Ok(None),
    };

    let mut header_lines = 0;
    while let Some(line) = read_line(&mut reader)? {
        if line.is_empty() {
            break;
        }
        header_lines += 1;
        if header_lines > MAX_HEADER_LINES {
            return Err(AppError::BadRequest);
        }
    }

    Ok(Some(request_line))
}

// One line without its CRLF; `None` at end of stream.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, AppError> {
    let mut line = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    if line.len() > MAX_LINE_LENGTH {
        return Err(AppError::BadRequest);
    }
    Ok(Some(line))
}

/// Builds the response for one request line.
pub fn respond(
    request_line: &str,
    ctx: &ServeContext,
    log_prefix: &str,
) -> Result<HttpResponse, AppError> {
    let (method, target) = parse_request_line(request_line)?;
    if method != "GET" {
        return Err(AppError::MethodNotAllowed);
    }

    match classify(&ctx.root, target)? {
        Route::Archive(path) => serve_archive(&path, ctx, log_prefix),
        Route::File(path) => serve_file(&path, log_prefix),
        Route::Directory(path) => {
            let (url_path, _) = split_target(target);
            serve_directory(&path, url_path, ctx, log_prefix)
        }
    }
}

fn serve_file(path: &Path, log_prefix: &str) -> Result<HttpResponse, AppError> {
    info!("{} serve_file: '{}'", log_prefix, path.display());
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".to_string()))
        }
        Err(e) => return Err(AppError::Io(e)),
    };
    let metadata = file.metadata()?;

    let mut response = HttpResponse::new(200, "OK").with_stream_body(
        file,
        metadata.len(),
        get_mime_type(path),
    );
    if let Ok(modified) = metadata.modified() {
        response = response.add_header("Last-Modified", http_date(modified));
    }
    Ok(response)
}

fn serve_directory(
    path: &Path,
    url_path: &str,
    ctx: &ServeContext,
    log_prefix: &str,
) -> Result<HttpResponse, AppError> {
    if !path.is_dir() {
        return Err(AppError::NotFound("File not found".to_string()));
    }
    // Listing links are relative, so folder URLs must end in a slash. A
    // single leading slash keeps `//host` from becoming a link to another site.
    if !url_path.ends_with('/') {
        let location = format!("/{}/", url_path.trim_start_matches('/'));
        return Ok(create_redirect_response(&location));
    }

    info!("{} serve_directory: '{}'", log_prefix, path.display());
    let html = generate_directory_listing(&ctx.root, path, &ctx.title)?;
    Ok(HttpResponse::new(200, "OK").with_html_body(html))
}

fn serve_archive(
    path: &Path,
    ctx: &ServeContext,
    log_prefix: &str,
) -> Result<HttpResponse, AppError> {
    info!("{} serve_archive: '{}'", log_prefix, path.display());
    let archive = build_archive(&ctx.root, path, &ctx.archive_name)?;
    let disposition = content_disposition(archive.file_name());
    let len = archive.len();

    Ok(HttpResponse::new(200, "OK")
        .add_header("Content-Disposition", disposition)
        .with_stream_body(archive, len, "application/zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::{tempdir, TempDir};

    fn sample_share() -> (TempDir, ServeContext) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), "bye").unwrap();

        let ctx = ServeContext {
            root: dir.path().canonicalize().unwrap(),
            chunk_size: 1024,
            title: "FileLinker".to_string(),
            archive_name: "folder".to_string(),
        };
        (dir, ctx)
    }

    #[test]
    fn classifies_each_route() {
        let (_dir, ctx) = sample_share();
        let root = &ctx.root;

        assert_eq!(classify(root, "/a.txt").unwrap(), Route::File(root.join("a.txt")));
        assert_eq!(classify(root, "/sub/").unwrap(), Route::Directory(root.join("sub")));
        assert_eq!(
            classify(root, "/sub/?zip=1").unwrap(),
            Route::Archive(root.join("sub"))
        );
        assert_eq!(
            classify(root, "/a.txt?zip=1").unwrap(),
            Route::Archive(root.join("a.txt"))
        );
        assert_eq!(
            classify(root, "/missing").unwrap(),
            Route::Directory(root.join("missing"))
        );
    }

    #[test]
    fn statuses_for_each_outcome() {
        let (_dir, ctx) = sample_share();
        let status = |line: &str| match respond(line, &ctx, "[test]") {
            Ok(response) => response.status_code,
            Err(e) => e.status().0,
        };

        assert_eq!(status("GET / HTTP/1.1"), 200);
        assert_eq!(status("GET /a.txt HTTP/1.1"), 200);
        assert_eq!(status("GET /sub/?zip=1 HTTP/1.1"), 200);
        assert_eq!(status("GET /sub HTTP/1.1"), 301);
        assert_eq!(status("GET /missing HTTP/1.1"), 404);
        assert_eq!(status("GET /missing/?zip=1 HTTP/1.1"), 404);
        assert_eq!(status("GET /a.txt?zip=1 HTTP/1.1"), 404);
        assert_eq!(status("POST / HTTP/1.1"), 405);
        assert_eq!(status("garbage"), 400);
    }

    #[test]
    fn archive_response_headers() {
        let (_dir, ctx) = sample_share();
        let response = respond("GET /sub/?zip=1 HTTP/1.1", &ctx, "[test]").unwrap();
        assert_eq!(response.header("Content-Type"), Some("application/zip"));
        assert_eq!(
            response.header("Content-Disposition"),
            Some("attachment; filename=\"sub.zip\"")
        );

        let root = respond("GET /?zip=1 HTTP/1.1", &ctx, "[test]").unwrap();
        assert_eq!(
            root.header("Content-Disposition"),
            Some("attachment; filename=\"folder.zip\"")
        );
    }

    #[test]
    fn file_response_headers() {
        let (_dir, ctx) = sample_share();
        let response = respond("GET /a.txt HTTP/1.1", &ctx, "[test]").unwrap();
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.body.len(), 2);
        assert!(response.header("Last-Modified").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_forbidden() {
        let (dir, ctx) = sample_share();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = classify(&ctx.root, "/escape/secret.txt").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[cfg(unix)]
    #[test]
    fn archive_leaves_out_linked_files_outside_root() {
        let (dir, ctx) = sample_share();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "top secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("sub").join("secret.txt"),
        )
        .unwrap();

        let response = respond("GET /sub/?zip=1 HTTP/1.1", &ctx, "[test]").unwrap();
        let mut out = Vec::new();
        response.send(&mut out, 1024, "[test]").unwrap();
        let body_start = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;

        let zip = zip::ZipArchive::new(std::io::Cursor::new(out[body_start..].to_vec())).unwrap();
        let names: Vec<_> = zip.file_names().collect();
        assert_eq!(names, vec!["b.txt"]);
    }

    #[test]
    fn redirect_stays_on_this_host() {
        let (dir, ctx) = sample_share();
        fs::create_dir(dir.path().join("evil.example")).unwrap();

        let response = respond("GET //evil.example HTTP/1.1", &ctx, "[test]").unwrap();
        assert_eq!(response.status_code, 301);
        assert_eq!(response.header("Location"), Some("/evil.example/"));

        let nested = respond("GET /sub HTTP/1.1", &ctx, "[test]").unwrap();
        assert_eq!(nested.header("Location"), Some("/sub/"));
    }

    #[test]
    fn archive_of_non_ascii_folder_names_it_safely() {
        let (dir, ctx) = sample_share();
        fs::create_dir(dir.path().join("фото")).unwrap();
        fs::write(dir.path().join("фото").join("1.txt"), "1").unwrap();

        let response = respond("GET /%D1%84%D0%BE%D1%82%D0%BE/?zip=1 HTTP/1.1", &ctx, "[test]")
            .unwrap();
        assert_eq!(
            response.header("Content-Disposition"),
            Some("attachment; filename=\"____.zip\"; filename*=UTF-8''%D1%84%D0%BE%D1%82%D0%BE.zip")
        );
    }

    #[test]
    fn reads_request_line_and_skips_headers() {
        let raw = b"GET /a.txt HTTP/1.1\r\nHost: x\r\nX-Bin: \xff\xfe\r\n\r\n";
        let line = read_request(Cursor::new(&raw[..])).unwrap();
        assert_eq!(line.as_deref(), Some("GET /a.txt HTTP/1.1"));

        assert!(read_request(Cursor::new(&b""[..])).unwrap().is_none());
    }

    #[test]
    fn non_utf8_request_line_is_bad_request() {
        let raw = b"GET /\xff HTTP/1.1\r\n\r\n";
        let err = read_request(Cursor::new(&raw[..])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest));
        assert_eq!(err.status().0, 400);
    }

    #[test]
    fn overlong_lines_are_bad_request() {
        let long_target = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(MAX_LINE_LENGTH));
        let err = read_request(Cursor::new(long_target.into_bytes())).unwrap_err();
        assert!(matches!(err, AppError::BadRequest));

        let long_header = format!(
            "GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n",
            "b".repeat(MAX_LINE_LENGTH)
        );
        let err = read_request(Cursor::new(long_header.into_bytes())).unwrap_err();
        assert!(matches!(err, AppError::BadRequest));
    }

    #[test]
    fn too_many_headers_are_bad_request() {
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        for i in 0..=MAX_HEADER_LINES {
            raw.push_str(&format!("X-{i}: v\r\n"));
        }
        raw.push_str("\r\n");
        let err = read_request(Cursor::new(raw.into_bytes())).unwrap_err();
        assert!(matches!(err, AppError::BadRequest));
    }
}
