//! Canonical UUIDs and sharded storage paths.
//!
//! Merge sessions and stored merge receipts are identified by UUIDs in a single *canonical*
//! representation: **32 lowercase hexadecimal characters** (no hyphens), the same value
//! `Uuid::new_v4().simple().to_string()` produces.
//!
//! Externally supplied identifiers (REST path segments, CLI arguments) must already be
//! canonical; [`ShardableUuid::parse`] rejects anything else instead of normalising it.
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, data is stored under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `data/merged/55/0e/550e8400e29b41d4a716446655440000/`

mod service;

pub use service::{ShardableUuid, Uuid};

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
