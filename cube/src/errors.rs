//! The errors of the cube codec and validity engine

use thiserror::Error;

use crate::definitions::params::FieldType;

/// Errors raised while assembling or walking a field list
#[derive(Debug, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FieldError {
    #[error("Encoded fields exceed the payload capacity of {capacity} bytes")]
    Oversized { capacity: usize },

    #[error("Unknown TLV field type 0x{0:02x}")]
    UnknownType(u8),

    #[error("Field {field_type:?} must be {expected} bytes, got {got}")]
    WrongLength {
        field_type: FieldType,
        expected: usize,
        got: usize,
    },

    #[error("Field body of {len} bytes cannot be length-encoded")]
    ValueTooLong { len: usize },

    #[error("Mandatory positional field {0:?} is missing")]
    MissingPositional(FieldType),

    #[error("Positional field {0:?} is out of place")]
    MisplacedPositional(FieldType),

    #[error("Field {0:?} is not allowed in this cube type")]
    UnexpectedField(FieldType),

    #[error("TLV field at offset {offset} overflows the payload region")]
    TlvOverflow { offset: usize },
}

/// The errors that can occur while compiling or validating a cube
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CubeError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Cube binary must be {expected} bytes, got {got}")]
    BinaryLength { expected: usize, got: usize },

    #[error("Cube type 0x{0:02x} is not implemented")]
    TypeNotImplemented(u8),

    #[error("No nonce satisfying difficulty {difficulty} found in {attempts} attempts")]
    InsufficientDifficulty { difficulty: u16, attempts: u64 },

    #[error("Cube key does not match its binding or difficulty target")]
    InvalidKey,

    #[error("Cube signature verification failed")]
    Signature,

    #[error("Signing keys are required to compile this cube type")]
    MissingSigningKey,

    #[error("Cube has not been compiled yet")]
    NotCompiled,

    #[error("Compile was cancelled")]
    Cancelled,

    #[error("Update is not monotonic with respect to its predecessor")]
    UpdateNotMonotonic,
}
