// ABOUTME: Application-wide error types for checkflux.
// ABOUTME: Uses thiserror for ergonomic error handling.

use crate::flux::FluxError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid source host: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Flux(#[from] FluxError),

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("{failed} of {total} flow(s) did not match expectations")]
    FlowMismatch { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
