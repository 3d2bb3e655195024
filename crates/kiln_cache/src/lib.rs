//! Object cache store for compiler results.
//!
//! Entries are keyed by the fingerprint of a compiler invocation and hold the
//! produced object file together with the compiler's captured diagnostics.
//! The store is shared by many concurrent `kiln-cc` processes: entries are
//! placed with write-to-temp-then-rename so readers only ever observe whole
//! entries, and every read validates a checksummed header so a damaged entry
//! degrades to a cache miss.

#![warn(missing_docs)]

pub mod entry;
pub mod error;
pub mod fs;
pub mod store;

pub use entry::CacheEntry;
pub use error::CacheError;
pub use store::{CacheStats, CacheStore, TrimReport};
