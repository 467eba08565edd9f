//! Typed errors for conditions callers are expected to match on.
//!
//! Most functions in the crate return [`anyhow::Result`];
//! the variants below travel inside it and can be recovered
//! with `err.downcast_ref::<Error>()`.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("\"{0}\" is not a valid unit")]
    InvalidUnit(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("the file \"{}\" could not be found", .0.display())]
    FileNotFound(PathBuf),

    #[error("no {0} metadata found")]
    MetadataNotFound(&'static str),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("refusing to overwrite the source file \"{}\"", .0.display())]
    Overwrite(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns the typed error carried by an [`anyhow::Error`],
/// if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&Error> {
    err.downcast_ref::<Error>()
}
