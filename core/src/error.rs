//! Error taxonomy shared by the build pipeline, the index reader and the
//! query engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::language::Language;

#[derive(Debug, Error)]
pub enum SearchError {
    /// The document source was unreachable or produced malformed input.
    #[error("corpus read error: {0}")]
    CorpusRead(String),

    /// Writing a segment or a staged artifact failed.
    #[error("spill write error at {path}: {source}")]
    SpillWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An on-disk artifact failed validation. The index is refused.
    #[error("corrupt index [{language}]: {reason}")]
    CorruptIndex { language: String, reason: String },

    /// The language is unsupported or has no built index.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("invalid query: {0}")]
    QueryValidation(String),

    /// Another process or thread already holds the build lock.
    #[error("a build is already running for language {0}")]
    BuildInProgress(Language),

    #[error("checkpoint write failed at {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SearchError {
    pub fn corrupt(language: Language, reason: impl Into<String>) -> Self {
        SearchError::CorruptIndex { language: language.to_string(), reason: reason.into() }
    }

    pub fn spill(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SearchError::SpillWrite { path: path.into(), source }
    }
}

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        SearchError::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
