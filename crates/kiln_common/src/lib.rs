//! Shared foundational types used across the kiln build pipeline.
//!
//! This crate provides content hashing for compiler-invocation fingerprints
//! and human-readable byte sizes for cache limits.

#![warn(missing_docs)]

pub mod hash;
pub mod size;

pub use hash::{ContentHash, FingerprintBuilder};
pub use size::{ByteSize, ParseByteSizeError};
