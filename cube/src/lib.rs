//! # cube
//!
//! The low level definitions of the Verity cube wire format: a cube is a
//! fixed 1024-byte self-authenticating record addressed by a 32-byte key.
//!
//! The crate splits into [definitions] (the parameter space and positional
//! layouts), [parser] (bytes to fields), [generator] (fields to bytes),
//! [entity] (the stateful [Cube](entity::Cube)) and [keys] (hashing,
//! difficulty and signatures).

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod definitions;
pub mod entity;
pub mod errors;
pub mod generator;
pub mod keys;
pub mod parser;
pub mod relationship;

#[cfg(test)]
mod tests;

pub use strum;
pub use zerocopy;

pub use crate::definitions::fields::{Field, FieldSet};
pub use crate::definitions::params::{CubeFamily, CubeType, FieldType, RelationshipType};
pub use crate::definitions::CUBE_SIZE;
pub use crate::entity::{CompileOptions, Cube};
pub use crate::errors::{CubeError, FieldError};
pub use crate::keys::{CubeKey, SigningKeys};
pub use crate::relationship::Relationship;
