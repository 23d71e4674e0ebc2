//! Domain-specific error types for beacon-proxy.
//!
//! Uses `thiserror` for the library surface; the binary and config loading
//! use `anyhow` with context on top.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the analysis session lifecycle.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to spawn analysis worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Queue capacity must be greater than 0")]
    ZeroCapacity,

    #[error("Analysis worker stopped before the queue was closed")]
    WorkerGone,

    #[error("Analysis worker panicked")]
    WorkerPanicked,
}

/// Errors raised while reading pair records.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read pair file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pair record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
