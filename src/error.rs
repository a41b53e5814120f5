//! Error types for source resolution, discovery and stage dispatch.
//!
//! Each fatal category aborts a run and bubbles up unmodified to the CLI,
//! which reports it and exits non-zero. Nothing here is retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::Language;
use crate::stages::Stage;

/// Errors raised while materializing a remote input locally.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to run git: {0}")]
    GitSpawn(#[source] std::io::Error),
    #[error("git clone of {url} failed: {stderr}")]
    Clone { url: String, stderr: String },
    #[error("download of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("cannot derive a local name from {0:?}")]
    BadReference(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while walking a directory for source files.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("cannot read {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("cannot resolve {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a single analysis stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("missing credential: set {0} or configure llm.api_key")]
    MissingCredential(String),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("language model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned no content")]
    EmptyResponse,
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no {stage} stage registered for {language}")]
    Unregistered { language: Language, stage: Stage },
    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that stop the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Zero files in both sequences; no stage was run.
    #[error("nothing to analyze: no Solidity or Rust files were found")]
    NothingToAnalyze,
    #[error("{stage} stage failed on {file}: {source}")]
    Stage {
        file: PathBuf,
        stage: Stage,
        #[source]
        source: StageError,
    },
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure while turning an input reference into a file set.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}
