//! Error types for bulk-dl.
//!
//! [`Error`] covers failures that abort a whole run (bad configuration, an
//! unreadable URL file, a missing output directory) and misuse of the pool.
//! [`DownloadError`] covers a single transfer; it never escapes a worker and
//! is reported as a [`DownloadResult::Failure`](crate::models::DownloadResult).

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A task was submitted after the pool was shut down.
    #[error("worker pool is shut down")]
    PoolShutDown,

    #[error("failed to read URL file {}", .path.display())]
    UrlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create output directory {}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a single download failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("malformed URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("server responded with HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}
