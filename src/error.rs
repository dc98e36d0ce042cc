use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum UsiError {
    #[error("malformed USI, expected at least five ':'-separated fields: {0}")]
    MalformedUsi(String),

    #[error("USI does not reference a scan: {0}")]
    InvalidUsi(String),

    #[error("no raw file named {collection} in project {project}")]
    FileNotResolved { project: String, collection: String },

    #[error("project {0} not found or has no publication date")]
    ProjectNotResolved(String),

    #[error("invalid publication date for project {project}: {value}")]
    InvalidPublicationDate { project: String, value: String },

    #[error("catalog request failed: {0}")]
    CatalogUnavailable(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("object store request failed: {0}")]
    ObjectStoreUnavailable(String),

    #[error("object not found in store: {0}")]
    ObjectNotFound(String),

    #[error("spectrum extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("cache store request failed: {0}")]
    CacheStoreUnavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("missing config file usi-service.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("server error: {0}")]
    Server(String),
}

impl UsiError {
    pub fn status_code(&self) -> u16 {
        match self {
            UsiError::MalformedUsi(_) => 400,
            UsiError::InvalidUsi(_)
            | UsiError::FileNotResolved { .. }
            | UsiError::ProjectNotResolved(_) => 404,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
