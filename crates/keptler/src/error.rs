//! Error types for keptler

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to produce a value from a generation rule
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("unsupported rule {0:?}")]
    UnsupportedRule(String),

    #[error("unknown charset {0:?}")]
    UnknownCharset(String),

    #[error("unknown key format {0:?}")]
    UnknownKeyFormat(String),

    #[error("{rule} requires {param}")]
    MissingParam { rule: String, param: String },

    #[error("generation failed: {0}")]
    Failure(String),
}

/// Errors surfaced by template parsing and materialization
#[derive(Error, Debug)]
pub enum Error {
    #[error("generate {name}: {source}")]
    Generate {
        name: String,
        #[source]
        source: GenerateError,
    },

    #[error("destination file {}: {source}", .path.display())]
    DestinationIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file {}: {source}", .path.display())]
    StateWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    StateEncode(#[from] serde_json::Error),

    #[error("template {}: {source}", .path.display())]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid annotation param {param:?} on line {line}")]
    InvalidAnnotationParam { line: usize, param: String },

    #[error("empty keptler annotation on line {line}")]
    EmptyAnnotation { line: usize },

    #[error("no state passphrase configured - set KEPTLER_STATE_PASSPHRASE")]
    MissingPassphrase,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Name of the secret this error is about, when there is one
    pub fn secret_name(&self) -> Option<&str> {
        match self {
            Error::Generate { name, .. } => Some(name),
            _ => None,
        }
    }
}
