//! Error types for osmsync
//!
//! A single enum covers every failure the append and create flows can hit.
//! Callers branch on the variant, and the binary turns it into a process exit
//! code through [`SyncError::exit_code`].

use thiserror::Error;

/// Result type alias for osmsync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Process exit codes reported by the `osmsync` binary
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const GET_OBJECT_ERROR: i32 = 101;
    pub const INVALID_STATE_FILE_ERROR: i32 = 102;
    pub const PUT_OBJECT_ERROR: i32 = 103;
    pub const HTTP_ERROR: i32 = 105;
    pub const TERMINATED: i32 = 130;
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Bucket '{0}' does not exist")]
    BucketDoesNotExist(String),

    #[error("Invalid state file '{key}': {reason}")]
    InvalidStateFile { key: String, reason: String },

    #[error("Failed to get object '{key}': {message}")]
    GetObject { key: String, message: String },

    #[error("Failed to put object '{key}': {message}")]
    PutObject { key: String, message: String },

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Upstream '{url}' is unavailable: {message}")]
    HttpUpstreamUnavailable { url: String, message: String },

    #[error("Upstream '{url}' responded with status {status}")]
    HttpUpstreamResponse { url: String, status: u16 },

    #[error("Request to '{url}' failed: {message}")]
    HttpDispatch { url: String, message: String },

    #[error("osm2pgsql failed with exit code {}: {stderr}", display_code(.exit_code))]
    Osm2pgsql { exit_code: Option<i32>, stderr: String },

    #[error("osmium failed with exit code {}: {stderr}", display_code(.exit_code))]
    Osmium { exit_code: Option<i32>, stderr: String },

    #[error("Geometry '{0}' is neither a valid GeoJSON nor a bbox")]
    InvalidGeometry(String),

    #[error("Remote resource '{id}' not found: {message}")]
    RemoteResourceNotFound { id: String, message: String },

    #[error("Resource '{0}' was requested before it was loaded")]
    ResourceNotLoaded(String),

    #[error("Request already in queue '{0}'")]
    RequestAlreadyInQueue(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Dump server '{0}' returned an empty dumps list")]
    DumpServerEmptyResponse(String),

    #[error("Project '{0}' is locked by another instance")]
    ProjectLocked(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Terminated by signal")]
    Terminated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn invalid_state(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStateFile {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is the benign duplicate-submission outcome of a queue push
    pub fn is_already_queued(&self) -> bool {
        matches!(self, Self::RequestAlreadyInQueue(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::GetObject { .. } => exit_codes::GET_OBJECT_ERROR,
            Self::PutObject { .. } => exit_codes::PUT_OBJECT_ERROR,
            Self::InvalidStateFile { .. } => exit_codes::INVALID_STATE_FILE_ERROR,
            Self::HttpUpstreamUnavailable { .. }
            | Self::HttpUpstreamResponse { .. }
            | Self::HttpDispatch { .. } => exit_codes::HTTP_ERROR,
            Self::Terminated => exit_codes::TERMINATED,
            _ => exit_codes::GENERAL_ERROR,
        }
    }
}
