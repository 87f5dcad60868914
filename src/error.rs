//! Error taxonomy for the cursor/transaction core.
//!
//! Mirrors quickstep's plain enum (`QSError`) rather than reaching
//! for `thiserror`: this crate has exactly four failure modes and they are
//! all exhaustively handled by callers, so derive-macro boilerplate buys
//! nothing.

use std::fmt;

/// The only error values visible outside the cursor/transaction core.
///
/// Every other internal failure is a [`BtreeError::Bug`] (invariant
/// violation, fails fast).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtreeError {
    /// Transaction restart required: a cursor or its peer ring could not
    /// make progress without releasing all locks and retrying.
    Restart,
    /// Node cache exhausted during traversal; caller must cannibalise the
    /// cache and retry.
    NoMem,
    /// I/O or checksum failure; the cursor is poisoned and all further
    /// key-returning calls on it surface this error.
    Io,
    /// An invariant was violated. In debug builds callers are expected to
    /// have already panicked via `debug_assert!`; this variant exists so
    /// release builds have a defined (if useless) value to propagate rather
    /// than invoking undefined behaviour.
    Bug(&'static str),
}

impl fmt::Display for BtreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BtreeError::Restart => write!(f, "EINTR: transaction restart required"),
            BtreeError::NoMem => write!(f, "ENOMEM: node cache exhausted"),
            BtreeError::Io => write!(f, "EIO: node read or checksum failure"),
            BtreeError::Bug(msg) => write!(f, "internal invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for BtreeError {}

pub type BtreeResult<T> = Result<T, BtreeError>;
