//! Session coordinator: drives transfers from start to their terminal outcome.
//!
//! The [`SessionCoordinator`] owns the [`TransferRegistry`] and a
//! [`Finalizer`], creates transport tasks, and reacts to transport events:
//!
//! - progress events are turned into fraction/ETA callbacks
//! - a finished event is finalized (unless the HTTP status is 400 or above)
//! - every terminal path removes the record and fires `on_completion` once
//!
//! # Concurrency
//!
//! All methods take `&self` and may be called from any thread. Events for
//! different URLs never contend beyond the registry lock. For one URL the
//! terminal transition is claimed on the record, so a finish racing a
//! cancellation fires exactly one completion callback, and a transfer that is
//! already finalizing stays registered until that callback. Callbacks are
//! invoked without holding any coordinator lock and may call back into the
//! coordinator. A completion raised while the transfer's progress callbacks
//! are running is delivered once they return, and the remaining progress
//! callbacks of that event are skipped, so nothing fires after
//! `on_completion`.
//!
//! # Example
//!
//! ```no_run
//! use download_manager::{DownloadRequest, HttpTransport, SessionConfig, SessionCoordinator};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let coordinator = SessionCoordinator::new(config.clone(), HttpTransport::new(&config)?);
//! let url = Url::parse("https://example.com/files/a.bin")?;
//! coordinator.start(
//!     DownloadRequest::new(url, "files")
//!         .on_progress(|fraction| println!("{:.0}%", fraction * 100.0))
//!         .on_completion(|ok| println!("done: {ok}")),
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod failure;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};
use url::Url;

pub use config::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, SessionConfig, default_caches_root};
pub use failure::TransferFailure;

use crate::finalize::{Finalizer, discard_temp_file};
use crate::notify::{LogNotifier, Notifier};
use crate::progress::{estimated_seconds_remaining, fraction_complete};
use crate::registry::TransferRegistry;
use crate::transfer::{DownloadRequest, TransferInfo, TransferRecord, TransferState};
use crate::transport::{
    EventSink, Transport, TransportError, TransportEvent, TransportEvents, dispatch,
};

/// Result of [`SessionCoordinator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new transfer was registered and its transport operation resumed.
    Started,
    /// The URL is already being downloaded; nothing happened.
    AlreadyActive,
}

/// Handler run once when the background channel drains.
pub type BackgroundCompletionHandler = Box<dyn FnOnce() + Send>;

struct BackgroundCompletion {
    handler: BackgroundCompletionHandler,
    notification: Option<String>,
}

/// Orchestrates registry, transport, progress estimation, and finalization.
#[derive(Clone)]
pub struct SessionCoordinator {
    core: Arc<CoordinatorCore>,
    transport: Arc<dyn Transport>,
}

/// State shared with transports through [`EventSink`].
struct CoordinatorCore {
    registry: TransferRegistry,
    finalizer: Finalizer,
    background: Mutex<Option<BackgroundCompletion>>,
    notifier: Arc<dyn Notifier>,
}

impl SessionCoordinator {
    /// Creates a coordinator that logs background notifications.
    #[must_use]
    pub fn new(config: SessionConfig, transport: impl Transport + 'static) -> Self {
        Self::with_notifier(config, transport, Arc::new(LogNotifier))
    }

    /// Creates a coordinator delivering background notifications to `notifier`.
    #[must_use]
    #[instrument(level = "debug", skip_all, fields(caches_root = %config.caches_root.display()))]
    pub fn with_notifier(
        config: SessionConfig,
        transport: impl Transport + 'static,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        debug!(
            collision_policy = %config.collision_policy,
            "creating session coordinator"
        );
        Self {
            core: Arc::new(CoordinatorCore {
                registry: TransferRegistry::new(),
                finalizer: Finalizer::new(config.caches_root, config.collision_policy),
                background: Mutex::new(None),
                notifier,
            }),
            transport: Arc::new(transport),
        }
    }

    /// Sink that routes transport events to this coordinator.
    #[must_use]
    pub fn events(&self) -> EventSink {
        EventSink::new(Arc::clone(&self.core) as Arc<dyn TransportEvents>)
    }

    /// The finalizer used for completed transfers.
    #[must_use]
    pub fn finalizer(&self) -> &Finalizer {
        &self.core.finalizer
    }

    /// Starts downloading `request.url()` unless it is already active.
    ///
    /// A duplicate request is logged and ignored; none of its callbacks fire.
    /// Otherwise exactly one transport operation begins. The call never waits
    /// for the transfer itself.
    #[instrument(skip(self, request), fields(url = %request.url(), mode = %request.mode()))]
    pub fn start(&self, request: DownloadRequest) -> StartOutcome {
        let url = request.url().clone();
        if self.core.registry.contains(&url) {
            info!("file is already downloading");
            return StartOutcome::AlreadyActive;
        }

        let task = self
            .transport
            .begin_download(&url, request.mode(), self.events());
        let record = Arc::new(TransferRecord::new(request, task));

        if !self.core.registry.insert(&url, Arc::clone(&record)) {
            info!("file is already downloading");
            record.transport().cancel();
            return StartOutcome::AlreadyActive;
        }

        debug!(
            file_name = record.file_name(),
            destination_dir = record.destination_dir(),
            "transfer queued"
        );
        record.transport().resume();
        StartOutcome::Started
    }

    /// Cancels the transfer for `url`.
    ///
    /// Claims the terminal outcome, removes the record from the registry,
    /// fires `on_completion(false)`, then cancels the transport operation.
    /// Returns false if the URL was not active or is already settling; a
    /// settling transfer stays registered until its own completion.
    #[instrument(skip(self), fields(url = %url))]
    pub fn cancel(&self, url: &Url) -> bool {
        let Some(record) = self.core.registry.lookup(url) else {
            debug!("cancel for inactive url ignored");
            return false;
        };
        if !claim_cancel(&record) {
            return false;
        }
        self.core.registry.remove_record(&record);
        finish_cancel(&record);
        true
    }

    /// Cancels every active transfer, returning how many were cancelled.
    #[instrument(skip(self))]
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for record in self.core.registry.remove_all() {
            if claim_cancel(&record) {
                finish_cancel(&record);
                cancelled += 1;
            }
        }
        info!(cancelled, "cancelled all downloads");
        cancelled
    }

    /// Returns true while `url` is being downloaded.
    #[must_use]
    pub fn is_active(&self, url: &Url) -> bool {
        self.core.registry.contains(url)
    }

    /// Snapshot of active URLs.
    #[must_use]
    pub fn active_urls(&self) -> Vec<Url> {
        self.core.registry.active_urls()
    }

    /// Snapshot of the transfer registered for `url`.
    #[must_use]
    pub fn transfer_info(&self, url: &Url) -> Option<TransferInfo> {
        self.core.registry.lookup(url).map(|record| record.info())
    }

    /// Caller-facing label of the transfer for `url`.
    #[must_use]
    pub fn display_name(&self, url: &Url) -> Option<String> {
        self.core
            .registry
            .lookup(url)
            .map(|record| record.display_name().to_string())
    }

    /// Registers the handler to run once the background channel drains,
    /// optionally followed by a user notification.
    ///
    /// Replaces any handler that has not run yet.
    pub fn set_background_completion_handler(
        &self,
        handler: impl FnOnce() + Send + 'static,
        notification: Option<String>,
    ) {
        let previous = self
            .core
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(BackgroundCompletion {
                handler: Box::new(handler),
                notification,
            });
        if previous.is_some() {
            debug!("replaced pending background completion handler");
        }
    }

    /// Handles a queued transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        dispatch(self.core.as_ref(), event);
    }

    /// Progress event for `url`.
    pub fn on_bytes_written(&self, url: &Url, written: u64, expected: Option<u64>) {
        self.core.bytes_written(url, written, expected);
    }

    /// Finished event for `url` with its spooled body.
    pub fn on_transfer_finished(&self, url: &Url, temp_location: &Path, http_status: Option<u16>) {
        self.core.finished(url, temp_location, http_status);
    }

    /// Transport failure for `url`.
    pub fn on_transfer_error(&self, url: &Url, error: TransportError) {
        self.core.error(url, error);
    }

    /// The background channel has no outstanding operations.
    pub fn on_background_queue_drained(&self) {
        self.core.background_queue_drained();
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("registry", &self.core.registry)
            .field("finalizer", &self.core.finalizer)
            .finish_non_exhaustive()
    }
}

impl CoordinatorCore {
    /// Single terminal transition after a successful claim: settle, remove,
    /// then notify.
    fn complete(&self, record: &Arc<TransferRecord>, outcome: Result<PathBuf, TransferFailure>) {
        let success = outcome.is_ok();
        record.settle(success);
        self.registry.remove_record(record);

        match &outcome {
            Ok(path) => info!(
                url = %record.source_url(),
                name = record.display_name(),
                path = %path.display(),
                "download completed"
            ),
            Err(failure) => warn!(
                url = %record.source_url(),
                name = record.display_name(),
                reason = failure.kind(),
                error = %failure,
                "download failed"
            ),
        }

        record.fire_completion(outcome.ok());
    }
}

impl TransportEvents for CoordinatorCore {
    fn bytes_written(&self, url: &Url, written: u64, expected: Option<u64>) {
        let Some(record) = self.registry.lookup(url) else {
            debug!(url = %url, "progress for untracked transfer ignored");
            return;
        };
        let Some(dispatch) = record.progress_dispatch() else {
            return;
        };

        if let Some(on_progress) = record.progress_callback()
            && let Some(fraction) = fraction_complete(written, expected)
            && dispatch.is_live()
        {
            on_progress(fraction);
        }
        if let Some(on_remaining_time) = record.remaining_time_callback()
            && let Some(seconds) =
                estimated_seconds_remaining(written, expected, record.started_at().elapsed())
            && dispatch.is_live()
        {
            on_remaining_time(seconds);
        }
    }

    fn finished(&self, url: &Url, temp_location: &Path, http_status: Option<u16>) {
        let Some(record) = self.registry.lookup(url) else {
            debug!(url = %url, "finish for untracked transfer ignored");
            discard_temp_file(temp_location);
            return;
        };
        if !record.claim_terminal(TransferState::Finalizing) {
            debug!(url = %url, "transfer already settling, finish ignored");
            discard_temp_file(temp_location);
            return;
        }

        let outcome = match http_status {
            Some(status) if status >= 400 => Err(TransferFailure::HttpStatus { status }),
            _ => self
                .finalizer
                .finalize(
                    temp_location,
                    record.destination_dir(),
                    record.file_name(),
                )
                .map_err(TransferFailure::from),
        };
        if outcome.is_err() {
            discard_temp_file(temp_location);
        }
        self.complete(&record, outcome);
    }

    fn error(&self, url: &Url, error: TransportError) {
        let Some(record) = self.registry.lookup(url) else {
            debug!(url = %url, error = %error, "error for untracked transfer ignored");
            return;
        };
        if !record.claim_terminal(TransferState::Failed) {
            return;
        }
        self.complete(&record, Err(TransferFailure::from(error)));
    }

    fn background_queue_drained(&self) {
        let pending = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pending) = pending else {
            debug!("background queue drained, no handler pending");
            return;
        };

        info!("background downloads finished");
        (pending.handler)();
        if let Some(message) = pending.notification {
            self.notifier.notify(&message);
        }
    }
}

fn claim_cancel(record: &TransferRecord) -> bool {
    if record.claim_terminal(TransferState::Failed) {
        true
    } else {
        debug!(url = %record.source_url(), "transfer already settling, cancel ignored");
        false
    }
}

/// Terminal path for a claimed record already out of the registry.
fn finish_cancel(record: &TransferRecord) {
    record.settle(false);
    info!(
        url = %record.source_url(),
        reason = TransferFailure::Cancelled.kind(),
        "download cancelled"
    );
    record.fire_completion(None);
    record.transport().cancel();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transfer::TransferMode;
    use crate::transport::TransportTask;

    struct IdleTask;

    impl TransportTask for IdleTask {
        fn resume(&self) {}
        fn cancel(&self) {}
    }

    struct IdleTransport;

    impl Transport for IdleTransport {
        fn begin_download(
            &self,
            _url: &Url,
            _mode: TransferMode,
            _events: EventSink,
        ) -> Box<dyn TransportTask> {
            Box::new(IdleTask)
        }
    }

    #[test]
    fn test_cancel_leaves_settling_transfer_registered() {
        let root = tempfile::TempDir::new().unwrap();
        let coordinator = SessionCoordinator::new(
            SessionConfig::with_caches_root(root.path()),
            IdleTransport,
        );
        let url = Url::parse("https://x.test/a.bin").unwrap();
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completions);
        coordinator.start(DownloadRequest::new(url.clone(), "files").on_completion(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let record = coordinator.core.registry.lookup(&url).unwrap();
        assert!(record.claim_terminal(TransferState::Finalizing));

        assert!(!coordinator.cancel(&url), "a finalizing transfer cannot be cancelled");
        assert!(coordinator.is_active(&url), "the record stays until its own completion");
        assert_eq!(
            coordinator.start(DownloadRequest::new(url.clone(), "files")),
            StartOutcome::AlreadyActive,
            "no second transfer may race the finalization"
        );
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
}
