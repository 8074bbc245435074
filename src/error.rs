//! Error types for the slot router.

use crate::types::SlotId;
use std::io;
use thiserror::Error;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the slot router.
///
/// Every variant is returned synchronously to the caller. Nothing here is
/// retried inside the router; retry policy belongs to the client-facing layer.
#[derive(Error, Debug)]
pub enum Error {
    /// The router was closed.
    #[error("use of closed router")]
    ClosedRouter,

    /// Slot id outside `0..MAX_SLOT_NUM`.
    #[error("use of invalid slot id: {0}")]
    InvalidSlotId(SlotId),

    /// Slot has no backend or is currently gated.
    #[error("slot {0} is not ready")]
    SlotNotReady(SlotId),

    /// Multi-key request whose keys hash to different slots.
    #[error("cross-slot request: keys hash to slots {first} and {second}")]
    CrossSlot { first: SlotId, second: SlotId },

    /// No connected pooled connection for the address in either role.
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// The migration source could not confirm the key was moved.
    #[error("slot {slot} migration from {from} failed: {reason}")]
    MigrationFailed {
        slot: SlotId,
        from: String,
        reason: String,
    },

    /// Slot descriptor rejected before any state was touched.
    #[error("invalid slot descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Errors surfaced by a backend connection handle.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl Error {
    /// Whether the client may reasonably retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::SlotNotReady(_) | Error::MigrationFailed { .. } | Error::Backend(_)
        )
    }
}

/// Errors reported by the connection layer.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The connection is not currently established.
    #[error("backend {0} is disconnected")]
    Disconnected(String),

    /// The connection was closed by its pool.
    #[error("backend connection closed")]
    Closed,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The source refused or failed a key migration.
    #[error("migrate failed: {0}")]
    Migrate(String),
}
