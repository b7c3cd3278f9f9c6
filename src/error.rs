use std::fmt;
use std::io::ErrorKind;

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    DirectoryNotFound(String),
    NotFound(String),
    Archive(String),
    Forbidden,
    BadRequest,
    MethodNotAllowed,
    InternalServerError(String),
}

impl AppError {
    /// HTTP status code and reason phrase this error is reported with.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            AppError::NotFound(_) | AppError::DirectoryNotFound(_) => (404, "Not Found"),
            AppError::Io(err) if err.kind() == ErrorKind::NotFound => (404, "Not Found"),
            AppError::Forbidden => (403, "Forbidden"),
            AppError::BadRequest => (400, "Bad Request"),
            AppError::MethodNotAllowed => (405, "Method Not Allowed"),
            AppError::Io(_) | AppError::Archive(_) | AppError::InternalServerError(_) => {
                (500, "Internal Server Error")
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "IO error: {err}"),
            AppError::DirectoryNotFound(path) => write!(f, "Directory not found: {path}"),
            AppError::NotFound(reason) => write!(f, "{reason}"),
            AppError::Archive(msg) => write!(f, "Error creating ZIP: {msg}"),
            AppError::Forbidden => write!(f, "Forbidden"),
            AppError::BadRequest => write!(f, "Bad request"),
            AppError::MethodNotAllowed => write!(f, "Method not allowed"),
            AppError::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        AppError::Archive(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::Archive(err.to_string())
    }
}

impl std::error::Error for AppError {}
