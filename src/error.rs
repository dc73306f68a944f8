//! Unified error handling for the sync engine.
//!
//! Every failure in this crate degrades to "no new data" for the caller.
//! Nothing here is fatal to the host process, so components log and return
//! these values instead of panicking.

use thiserror::Error;

/// Stage of the segment payload pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Base64,
    Gzip,
    Utf8,
    Json,
    Geometry,
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DecodeStage::Base64 => "base64",
            DecodeStage::Gzip => "gzip",
            DecodeStage::Utf8 => "utf-8",
            DecodeStage::Json => "json",
            DecodeStage::Geometry => "geometry",
        };
        f.write_str(name)
    }
}

fn network_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("Network error ({}): {}", code, message),
        None => format!("Network error: {}", message),
    }
}

/// Unified error type for sync operations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Location or notification permission was not granted
    #[error("Permission denied: {what}")]
    PermissionDenied { what: String },

    /// No live fix and the fallback policy produced no coordinate
    #[error("Location unavailable: {message}")]
    LocationUnavailable { message: String },

    /// Timeout, transport failure or non-2xx response
    #[error("{}", network_message(.message, .status_code))]
    Network {
        message: String,
        status_code: Option<u16>,
    },

    /// Malformed or corrupt segment payload
    #[error("Decode error at {stage} stage: {message}")]
    Decode { stage: DecodeStage, message: String },

    /// A fetch superseded by a newer request before it resolved
    #[error("Stale response: token {token} superseded by {latest}")]
    StaleResponse { token: u64, latest: u64 },

    /// No access token is available for an authenticated endpoint
    #[error("No access token available")]
    Unauthenticated,

    /// Local key/value storage failure
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Bounding box violates lon_min <= lon_max / lat_min <= lat_max
    #[error("Invalid bounds: {message}")]
    InvalidBounds { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn decode(stage: DecodeStage, message: impl ToString) -> Self {
        SyncError::Decode {
            stage,
            message: message.to_string(),
        }
    }

    pub fn persistence(message: impl ToString) -> Self {
        SyncError::Persistence {
            message: message.to_string(),
        }
    }

    /// Superseded responses are dropped silently rather than shown to the user.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleResponse { .. })
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::persistence(e)
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Extension trait for converting Option to SyncError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a decode error at the given stage.
    fn ok_or_decode(self, stage: DecodeStage, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_decode(self, stage: DecodeStage, message: &str) -> Result<T> {
        self.ok_or_else(|| SyncError::decode(stage, message))
    }
}
