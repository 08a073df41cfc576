//! The errors of the composition layer

use cube::errors::{CubeError, FieldError};
use cube::keys::CubeKey;
use thiserror::Error;

/// Errors of a broken continuation chain
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ChainError {
    #[error("A veritum needs at least one chunk")]
    Empty,

    #[error("Chunk {chunk} carries no continuation although chunks follow")]
    MissingContinuation { chunk: usize },

    #[error("Chunk {chunk} carries more than one continuation")]
    AmbiguousContinuation { chunk: usize },

    #[error("The terminal chunk {chunk} carries a dangling continuation")]
    DanglingContinuation { chunk: usize },

    #[error("Chunk {chunk} does not point at its successor's key")]
    KeyMismatch { chunk: usize },

    #[error("Chunk {key} could not be retrieved")]
    MissingChunk { key: CubeKey },

    #[error("Continuation chain loops back to {key}")]
    Cycle { key: CubeKey },

    #[error("Continuation relationships are reserved for the composer")]
    ReservedRelationship,
}

/// The errors that can occur while compiling or recombining a veritum
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum VeritumError {
    #[error(transparent)]
    Cube(#[from] CubeError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Encryption requested without any recipient")]
    NoRecipients,

    #[error("Payload encryption failed")]
    Encryption,

    #[error("Chunk size {size} cannot hold the positional runs and a continuation")]
    ChunkSizeTooSmall { size: usize },
}
