//! Top-level error type
//!
//! Wraps the per-layer errors behind one enum for the CLI entry point.
//! Each layer keeps its own thiserror type; this is only the seam where
//! they meet `main`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::runner::RunError;
use crate::store::StoreError;
use crate::uri::UriError;
use crate::workflow::{ReadError, ValidationError};

#[derive(Error, Debug)]
pub enum WeftError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeftError {
    /// Process exit code: a shell step's own code survives end to end,
    /// everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            WeftError::Run(err) => err.exit_code(),
            _ => 1,
        }
    }

    /// Traceback frames (caller-first) and the root cause, when a run
    /// error is wrapped inside.
    pub fn traceback(&self) -> (Vec<String>, String) {
        match self {
            WeftError::Run(err) => err.traceback(),
            other => (Vec::new(), other.to_string()),
        }
    }
}
