use crate::error::AppError;
use chrono::{DateTime, Utc};
use log::{debug, error};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io::{Read, Write};
use std::path::Path;
use std::time::SystemTime;

/// Native MIME type detection for common file types
pub fn get_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("epub") => "application/epub+zip",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("7z") => "application/x-7z-compressed",
        Some("apk") => "application/vnd.android.package-archive",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// RFC 5987 `attr-char`: everything else is percent-encoded in `filename*`.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `Content-Disposition` value offering `file_name` as a download.
///
/// Control characters are dropped so the name cannot break the header
/// block. Non-ASCII names get an ASCII fallback plus a `filename*`
/// parameter carrying the UTF-8 name.
pub fn content_disposition(file_name: &str) -> String {
    let clean: String = file_name.chars().filter(|c| !c.is_control()).collect();
    let fallback: String = clean
        .chars()
        .map(|c| match c {
            '"' | '\\' => '\'',
            c if c.is_ascii() => c,
            _ => '_',
        })
        .collect();

    if clean.is_ascii() {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            utf8_percent_encode(&clean, ATTR_CHAR)
        )
    }
}

/// Formats a timestamp as an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`).
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Response payload.
pub enum Body {
    Bytes(Vec<u8>),
    /// Streamed from a reader in fixed-size chunks; `len` bytes are expected.
    Stream { reader: Box<dyn Read + Send>, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HTTP/1.1 response builder
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![
                (
                    "Server".to_string(),
                    concat!("filelinker/", env!("CARGO_PKG_VERSION")).to_string(),
                ),
                ("Connection".to_string(), "close".to_string()),
            ],
            body: Body::Bytes(Vec::new()),
        }
    }

    pub fn with_html_body(mut self, body: String) -> Self {
        self.headers.push((
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        ));
        self.body = Body::Bytes(body.into_bytes());
        self
    }

    pub fn with_text_body(mut self, body: String) -> Self {
        self.headers.push((
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        ));
        self.body = Body::Bytes(body.into_bytes());
        self
    }

    pub fn with_stream_body<R>(mut self, reader: R, len: u64, mime_type: &str) -> Self
    where
        R: Read + Send + 'static,
    {
        self.headers
            .push(("Content-Type".to_string(), mime_type.to_string()));
        self.body = Body::Stream {
            reader: Box::new(reader),
            len,
        };
        self
    }

    pub fn add_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Writes status line, headers and body. Stream bodies are copied in
    /// `chunk_size` pieces.
    pub fn send<W: Write>(
        self,
        stream: &mut W,
        chunk_size: usize,
        log_prefix: &str,
    ) -> Result<(), AppError> {
        let content_length = self.body.len();
        debug!(
            "{} Sending response - Status: {}, Body Length: {}",
            log_prefix, self.status_code, content_length
        );

        let mut response = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);
        response.push_str(&format!("Content-Length: {content_length}\r\n"));
        for (name, value) in &self.headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("\r\n");

        stream.write_all(response.as_bytes()).map_err(|e| {
            error!("{log_prefix} Failed to write response headers: {e}");
            AppError::Io(e)
        })?;

        match self.body {
            Body::Bytes(bytes) => {
                stream.write_all(&bytes).map_err(|e| {
                    error!("{log_prefix} Failed to write response body: {e}");
                    AppError::Io(e)
                })?;
            }
            Body::Stream { mut reader, len } => {
                let mut bytes_remaining = len;
                let mut buffer = vec![0; chunk_size.max(1)];
                while bytes_remaining > 0 {
                    let to_read = std::cmp::min(bytes_remaining, buffer.len() as u64) as usize;
                    let bytes_read = reader.read(&mut buffer[..to_read])?;
                    if bytes_read == 0 {
                        break;
                    }
                    stream.write_all(&buffer[..bytes_read]).map_err(|e| {
                        error!("{log_prefix} Failed to write response body: {e}");
                        AppError::Io(e)
                    })?;
                    bytes_remaining -= bytes_read as u64;
                }
                if bytes_remaining > 0 {
                    error!("{log_prefix} Body ended {bytes_remaining} bytes short of Content-Length");
                }
            }
        }

        stream.flush().map_err(|e| {
            error!("{log_prefix} Failed to flush response: {e}");
            AppError::Io(e)
        })?;

        Ok(())
    }
}

/// Plain-text error response carrying the error's message.
pub fn create_error_response(err: &AppError) -> HttpResponse {
    let (status_code, status_text) = err.status();
    HttpResponse::new(status_code, status_text).with_text_body(err.to_string())
}

/// Redirect to `location` (used to add the trailing slash to folder URLs).
pub fn create_redirect_response(location: &str) -> HttpResponse {
    HttpResponse::new(301, "Moved Permanently")
        .add_header("Location", location.to_string())
        .with_text_body(format!("Moved to {location}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(get_mime_type(Path::new("a.txt")), "text/plain");
        assert_eq!(get_mime_type(Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(get_mime_type(Path::new("movie.mp4")), "video/mp4");
        assert_eq!(get_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn http_date_format() {
        let time = UNIX_EPOCH + Duration::from_secs(784_887_151);
        assert_eq!(http_date(time), "Tue, 15 Nov 1994 08:12:31 GMT");
    }

    #[test]
    fn sends_bytes_with_content_length() {
        let mut out = Vec::new();
        HttpResponse::new(200, "OK")
            .with_html_body("<p>hi</p>".to_string())
            .send(&mut out, 4, "[test]")
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(text.ends_with("\r\n\r\n<p>hi</p>"));
    }

    #[test]
    fn streams_in_chunks() {
        let data = b"0123456789abcdef".to_vec();
        let mut out = Vec::new();
        HttpResponse::new(200, "OK")
            .with_stream_body(Cursor::new(data.clone()), data.len() as u64, "text/plain")
            .send(&mut out, 3, "[test]")
            .unwrap();

        assert!(out.ends_with(&data));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 16\r\n"));
    }

    #[test]
    fn error_response_is_plain_text() {
        let response =
            create_error_response(&AppError::NotFound("Folder not found".to_string()));
        assert_eq!(response.status_code, 404);
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));

        let archive = create_error_response(&AppError::Archive("disk full".to_string()));
        assert_eq!(archive.status_code, 500);
        let mut out = Vec::new();
        archive.send(&mut out, 64, "[test]").unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .ends_with("Error creating ZIP: disk full"));
    }

    #[test]
    fn disposition_plain_name() {
        assert_eq!(
            content_disposition("photos.zip"),
            "attachment; filename=\"photos.zip\""
        );
        assert_eq!(
            content_disposition("say \"hi\".zip"),
            "attachment; filename=\"say 'hi'.zip\""
        );
    }

    #[test]
    fn disposition_drops_control_characters() {
        let value = content_disposition("evil\r\nSet-Cookie: x=1.zip");
        assert!(!value.contains('\r') && !value.contains('\n'));
        assert_eq!(value, "attachment; filename=\"evilSet-Cookie: x=1.zip\"");
    }

    #[test]
    fn disposition_encodes_non_ascii() {
        assert_eq!(
            content_disposition("Fotos 2024 é.zip"),
            "attachment; filename=\"Fotos 2024 _.zip\"; filename*=UTF-8''Fotos%202024%20%C3%A9.zip"
        );
    }

    #[test]
    fn redirect_sets_location() {
        let response = create_redirect_response("/sub/");
        assert_eq!(response.status_code, 301);
        assert_eq!(response.header("Location"), Some("/sub/"));
    }
}
