//! Outbound notification capability.
//!
//! When the background channel drains, the coordinator may hand a
//! caller-registered message to a [`Notifier`]. Desktop or mobile delivery
//! lives in platform adapters; the default just logs.

use tracing::info;

/// Delivers user-facing notifications.
pub trait Notifier: Send + Sync {
    /// Presents `message` to the user.
    fn notify(&self, message: &str);
}

/// Notifier that records the message as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(message, "notification");
    }
}
