//! Internal failure taxonomy for transfers.
//!
//! Callers only ever see `false` through the completion callback; the cause
//! is kept for logging.

use thiserror::Error;

use crate::finalize::FinalizeError;
use crate::transport::TransportError;

/// Why a transfer ended without a file in place.
#[derive(Debug, Error)]
pub enum TransferFailure {
    /// The response completed with a status of 400 or above.
    #[error("server responded with HTTP {status}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The transport failed before the body was complete.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The body arrived but could not be moved into place.
    #[error("finalization failed: {0}")]
    Finalize(#[from] FinalizeError),

    /// The caller cancelled the transfer.
    #[error("cancelled by user")]
    Cancelled,
}

impl TransferFailure {
    /// Returns the stable label used in structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpStatus { .. } => "http_status",
            Self::Transport(_) => "transport",
            Self::Finalize(_) => "finalize",
            Self::Cancelled => "cancelled",
        }
    }
}
