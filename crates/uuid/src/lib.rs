//! Research identifiers and the sharded path scheme.
//!
//! Every research lives under a directory derived from its identifier. To keep path derivation
//! deterministic, identifiers use one *canonical* textual form: the **lowercase hyphenated UUID**
//! (36 characters, `8-4-4-4-12` hex groups), which is the form the rest of the system hands
//! around (database keys, HTTP path segments).
//!
//! This crate provides:
//! - [`ResearchId`], a wrapper that *guarantees* the canonical form once constructed.
//! - The sharding logic that maps an identifier to its research directory.
//!
//! ## Canonical form
//! - Length: 36
//! - Hex groups of 8, 4, 4, 4 and 12 characters separated by `-`
//! - Characters: `0-9`, `a-f` and the four hyphens
//! - Example: `550e8400-e29b-41d4-a716-446655440000`
//!
//! Non-canonical values (uppercase, simple/unhyphenated, braced, wrong length) are rejected, which
//! also means an identifier can never contain `/` or `..`.
//!
//! ## Sharded directory layout
//! For a canonical identifier `id`, research data is stored under:
//! `root/<id[0..2]>/<id>/`
//!
//! Example:
//! `researches/55/550e8400-e29b-41d4-a716-446655440000/`
//!
//! The two-character shard bounds the number of entries in the root directory.

mod service;

pub use service::{ResearchId, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
