use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DwgmapError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Map service error: {0}")]
    GeoServer(#[from] GeoServerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create work directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors rejected synchronously at submission; no job is created.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Unsupported file type '{0}': expected a .dwg drawing")]
    UnsupportedFileType(String),

    #[error("Empty upload")]
    EmptyUpload,

    #[error("Failed to store upload '{path}': {source}")]
    StoreUpload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scheduler is shutting down")]
    Shutdown,
}

/// A single stage attempt failing for any reason. Terminal for the job.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to launch {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    #[error("{tool} timed out after {}s", timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },

    #[error("Stage produced no usable output: {0}")]
    MissingOutput(PathBuf),

    #[error("GeoPackage read failed: {0}")]
    Gpkg(#[from] rusqlite::Error),

    #[error("Publication failed: {0}")]
    Publish(#[from] GeoServerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Timeouts are system-detected and must read differently from
    /// user-initiated cancellation in client-facing messages.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum GeoServerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{action} returned {status}: {body}")]
    Unexpected {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("GeoPackage file not found: {0}")]
    MissingFile(PathBuf),
}

pub type Result<T> = std::result::Result<T, DwgmapError>;
