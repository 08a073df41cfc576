//! # veritum
//!
//! The composition layer above the cube codec: a veritum is a logical
//! field stream that may span any number of cubes, linked into a chain by
//! continuation relationships. This crate splits field streams into
//! chunks, recombines received chunks, encrypts payloads end-to-end and
//! resolves relationship graphs.

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

pub mod encrypt;
pub mod errors;
pub mod resolve;
mod split;
mod veritum;

#[cfg(test)]
mod tests;

pub use crate::encrypt::EncryptOptions;
pub use crate::errors::{ChainError, VeritumError};
pub use crate::resolve::{
    fetch_veritum, resolve_relationships, CubeRetriever, Resolution, ResolutionState,
    ResolveOptions, Veritable,
};
pub use crate::veritum::{Veritum, VeritumCompileOptions};

pub use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret as ExchangeSecret};
