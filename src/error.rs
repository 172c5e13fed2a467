//! Server error types.
//!
//! # Error Recovery Strategies
//!
//! - **`InvalidArgument`**, **`AmbiguousMissionId`**: caller bug or operator
//!   typo; fix the request and retry.
//! - **`DuplicateSubmap`**: a repeated notification for the same path; safe
//!   to ignore, the original record is still in flight.
//! - **`NotFound`**: the referenced robot, mission or map does not exist.
//! - **`ShuttingDown`**: the server no longer accepts work; nothing to retry.
//! - **`MapStore`**: submap load, checkpoint write or map delete failed.
//!   Checkpoint writes preserve the previous file via the rename discipline,
//!   so a failed checkpoint is loggable and non-fatal.
//!
//! Internal threads catch and log; they never let a failure terminate the
//! merge loop or the ingest pool.

use thiserror::Error;

use crate::map::MapStoreError;

/// Errors returned by the server's public operations.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("mission id prefix '{0}' is ambiguous ({1} matches)")]
    AmbiguousMissionId(String, usize),

    #[error("duplicate submap notification for '{0}'")]
    DuplicateSubmap(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("server already started")]
    AlreadyStarted,

    #[error(transparent)]
    MapStore(#[from] MapStoreError),
}
