//! Download Manager Library
//!
//! Client-side coordinator for concurrent file downloads. Callers start
//! downloads by URL, receive progress and time-remaining estimates, and get
//! exactly one completion callback per transfer. Finished files are moved to
//! `<caches root>/<destination dir>/<file name>`.
//!
//! # Architecture
//!
//! - [`session`] - The [`SessionCoordinator`] state machine
//! - [`registry`] - Active transfers keyed by URL
//! - [`progress`] - Fraction and ETA estimation
//! - [`finalize`] - Moving spooled bodies into the caches root
//! - [`transport`] - The transport seam and the reqwest-backed [`HttpTransport`]
//! - [`notify`] - User notifications after background downloads drain

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod finalize;
pub mod notify;
pub mod progress;
pub mod registry;
pub mod session;
pub mod transfer;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use finalize::{CollisionPolicy, FinalizeError, Finalizer, ParseCollisionPolicyError};
pub use notify::{LogNotifier, Notifier};
pub use progress::{estimated_seconds_remaining, fraction_complete, transfer_speed};
pub use registry::TransferRegistry;
pub use session::{SessionConfig, SessionCoordinator, StartOutcome, TransferFailure};
pub use transfer::{DownloadRequest, TransferInfo, TransferMode, TransferRecord, TransferState};
pub use transport::{
    EventSink, HttpTransport, Transport, TransportError, TransportEvent, TransportEvents,
    TransportTask,
};
