use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CalsyncError {
    #[error("invalid experiment id: {0}")]
    InvalidExperimentId(String),

    #[error("required file missing: {0}")]
    NotFound(String),

    #[error("experiment name not found in node metadata")]
    MissingExperimentName,

    #[error("remote dataset store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote dataset store returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("malformed experiment bundle: {0}")]
    MalformedBundle(String),

    #[error("unsupported figure type: {0}")]
    UnsupportedFigureType(String),

    #[error("figure record has no file name")]
    MissingFileName,

    #[error("invalid figure payload: {0}")]
    InvalidFigureData(String),

    #[error("unexpected figure type in strict pull: {0}")]
    UnexpectedFigureType(String),

    #[error("round-trip verification failed: {0}")]
    Verification(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
