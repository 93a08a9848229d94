// ── Core error types ──
//
// Errors returned synchronously by controller operations. Asynchronous
// link failures never surface here. They arrive as status changes on
// the callback and drive mode-specific recovery instead.

use thiserror::Error;

use crate::model::MacAddress;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum MeshError {
    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Mesh controller is not started")]
    NotStarted,

    #[error("Mesh controller must be started inside a tokio runtime")]
    NoRuntime,

    // ── Link errors ──────────────────────────────────────────────────
    #[error("Peripheral not discovered: {address}")]
    PeripheralNotFound { address: MacAddress },

    #[error("No connected peripheral")]
    NotConnected,

    #[error("Link is not logged in to the mesh")]
    NotLoggedIn,

    #[error("Command 0x{opcode:02x} rejected by the link")]
    CommandRejected { opcode: u8 },
}

/// Raised by an advertisement filter that could not process a record.
///
/// The scan pipeline logs it and moves on to the next filter; it never
/// interrupts scanning.
#[derive(Debug, Error)]
#[error("advertisement filter '{filter}' failed: {message}")]
pub struct FilterError {
    pub filter: String,
    pub message: String,
}

impl FilterError {
    pub fn new(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            message: message.into(),
        }
    }
}
