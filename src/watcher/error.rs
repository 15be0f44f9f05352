//! Error types for the watch session.

use std::path::PathBuf;
use thiserror::Error;

use crate::scanner::ScanError;

/// Errors from watch session operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Rescan of '{identifier}' failed: {source}")]
    ScanFailed {
        identifier: String,
        #[source]
        source: ScanError,
    },

    #[error("Session task failed: {reason}")]
    TaskFailed { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
