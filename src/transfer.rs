//! Transfer records: identity, callbacks, and lifecycle state of one download.
//!
//! A [`TransferRecord`] is created by the session coordinator from a
//! [`DownloadRequest`] and lives in the registry until its single terminal
//! transition. Only the coordinator mutates a live record.
//!
//! Progress callbacks run inside a [`ProgressDispatch`]. A completion raised
//! while one is open (from another thread, or from the progress callback
//! itself) is parked and delivered when the dispatch closes, so no callback
//! of a transfer ever runs after its completion callback.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use url::Url;

use crate::finalize::default_file_name;
use crate::finalize::sanitize_filename;
use crate::transport::TransportTask;

/// Receives the fractional progress of a transfer, in `[0, 1]`.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Receives the estimated seconds remaining for a transfer.
pub type RemainingTimeCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Receives the terminal outcome of a transfer (`true` on success).
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// Receives the final on-disk path of a successful transfer, just before
/// its completion callback.
pub type SavedCallback = Box<dyn FnOnce(&Path) + Send>;

/// Transport channel a transfer runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferMode {
    /// Regular transfer tied to the running process.
    #[default]
    Foreground,
    /// Transfer expected to continue while the application is suspended.
    Background,
}

impl TransferMode {
    /// Returns the stable lowercase label used in logs and output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transfer.
///
/// `Queued -> Transferring -> Finalizing -> {Completed | Failed}`; a transfer
/// may also fail straight from `Queued` or `Transferring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Registered, no bytes reported yet.
    Queued,
    /// At least one progress event has arrived.
    Transferring,
    /// The transport finished and the file is being moved into place.
    Finalizing,
    /// The file reached its destination.
    Completed,
    /// The transfer failed or was cancelled.
    Failed,
}

impl TransferState {
    /// Returns true once a terminal outcome has been claimed.
    #[must_use]
    pub fn is_settling(self) -> bool {
        matches!(self, Self::Finalizing | Self::Completed | Self::Failed)
    }
}

/// Caller-supplied description of a download to start.
///
/// # Example
///
/// ```
/// use download_manager::DownloadRequest;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/files/a.bin").unwrap();
/// let request = DownloadRequest::new(url, "files")
///     .display_name("Archive")
///     .on_completion(|ok| println!("finished: {ok}"));
/// assert_eq!(request.resolved_file_name(), "a.bin");
/// ```
pub struct DownloadRequest {
    pub(crate) url: Url,
    pub(crate) file_name: Option<String>,
    pub(crate) display_name: Option<String>,
    pub(crate) destination_dir: String,
    pub(crate) mode: TransferMode,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_remaining_time: Option<RemainingTimeCallback>,
    pub(crate) on_completion: Option<CompletionCallback>,
    pub(crate) on_saved: Option<SavedCallback>,
}

impl DownloadRequest {
    /// Creates a foreground request placing the file under `destination_dir`
    /// (relative to the caches root).
    #[must_use]
    pub fn new(url: Url, destination_dir: impl Into<String>) -> Self {
        Self {
            url,
            file_name: None,
            display_name: None,
            destination_dir: destination_dir.into(),
            mode: TransferMode::Foreground,
            on_progress: None,
            on_remaining_time: None,
            on_completion: None,
            on_saved: None,
        }
    }

    /// Overrides the on-disk file name (defaults to the URL's last path segment).
    #[must_use]
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the caller-facing label (defaults to the file name).
    #[must_use]
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Runs the transfer on the background channel when `background` is true.
    #[must_use]
    pub fn background(mut self, background: bool) -> Self {
        self.mode = if background {
            TransferMode::Background
        } else {
            TransferMode::Foreground
        };
        self
    }

    /// Registers a progress callback.
    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Registers a remaining-time callback.
    #[must_use]
    pub fn on_remaining_time(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_remaining_time = Some(Box::new(callback));
        self
    }

    /// Registers the completion callback, fired exactly once per transfer.
    #[must_use]
    pub fn on_completion(mut self, callback: impl FnOnce(bool) + Send + 'static) -> Self {
        self.on_completion = Some(Box::new(callback));
        self
    }

    /// Registers a callback receiving the final path, which differs from
    /// `destination_dir/file_name` when a collision policy renamed the file.
    #[must_use]
    pub fn on_saved(mut self, callback: impl FnOnce(&Path) + Send + 'static) -> Self {
        self.on_saved = Some(Box::new(callback));
        self
    }

    /// Returns the source URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the transfer mode.
    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Returns the file name the transfer will be saved under.
    #[must_use]
    pub fn resolved_file_name(&self) -> String {
        self.file_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_file_name(&self.url))
    }
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("url", &self.url.as_str())
            .field("file_name", &self.file_name)
            .field("display_name", &self.display_name)
            .field("destination_dir", &self.destination_dir)
            .field("mode", &self.mode)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_remaining_time", &self.on_remaining_time.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .field("on_saved", &self.on_saved.is_some())
            .finish()
    }
}

/// Read-only snapshot of a registered transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    /// Source URL (registry key).
    pub url: Url,
    /// On-disk file name.
    pub file_name: String,
    /// Caller-facing label.
    pub display_name: String,
    /// Directory under the caches root.
    pub destination_dir: PathBuf,
    /// Channel the transfer runs on.
    pub mode: TransferMode,
    /// Current lifecycle state.
    pub state: TransferState,
}

/// One tracked download.
pub struct TransferRecord {
    source_url: Url,
    file_name: String,
    display_name: String,
    destination_dir: String,
    started_at: Instant,
    mode: TransferMode,
    transport: Box<dyn TransportTask>,
    on_progress: Option<ProgressCallback>,
    on_remaining_time: Option<RemainingTimeCallback>,
    on_completion: Mutex<Option<CompletionCallback>>,
    on_saved: Mutex<Option<SavedCallback>>,
    state: Mutex<TransferState>,
    gate: Mutex<EventGate>,
}

#[derive(Default)]
struct EventGate {
    dispatching: bool,
    // Outcome raised while progress callbacks were running.
    parked: Option<Option<PathBuf>>,
}

impl TransferRecord {
    /// Builds a queued record from a request and its (still suspended) transport task.
    #[must_use]
    pub fn new(request: DownloadRequest, transport: Box<dyn TransportTask>) -> Self {
        let file_name = request.resolved_file_name();
        let display_name = request
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| file_name.clone());
        Self {
            source_url: request.url,
            file_name,
            display_name,
            destination_dir: request.destination_dir,
            started_at: Instant::now(),
            mode: request.mode,
            transport,
            on_progress: request.on_progress,
            on_remaining_time: request.on_remaining_time,
            on_completion: Mutex::new(request.on_completion),
            on_saved: Mutex::new(request.on_saved),
            state: Mutex::new(TransferState::Queued),
            gate: Mutex::new(EventGate::default()),
        }
    }

    /// Returns the source URL.
    #[must_use]
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Returns the on-disk file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the caller-facing label.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the destination directory relative to the caches root.
    #[must_use]
    pub fn destination_dir(&self) -> &str {
        &self.destination_dir
    }

    /// Returns when the record was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the transfer mode.
    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot suitable for handing out to callers.
    #[must_use]
    pub fn info(&self) -> TransferInfo {
        TransferInfo {
            url: self.source_url.clone(),
            file_name: self.file_name.clone(),
            display_name: self.display_name.clone(),
            destination_dir: PathBuf::from(&self.destination_dir),
            mode: self.mode,
            state: self.state(),
        }
    }

    pub(crate) fn transport(&self) -> &dyn TransportTask {
        self.transport.as_ref()
    }

    pub(crate) fn progress_callback(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    pub(crate) fn remaining_time_callback(&self) -> Option<&RemainingTimeCallback> {
        self.on_remaining_time.as_ref()
    }

    /// Moves `Queued` to `Transferring`. Returns false once a terminal
    /// outcome has been claimed, in which case no progress may be reported.
    pub(crate) fn mark_transferring(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            TransferState::Queued => {
                *state = TransferState::Transferring;
                true
            }
            TransferState::Transferring => true,
            _ => false,
        }
    }

    /// Claims the terminal transition, moving to `next`.
    ///
    /// Only the first claim succeeds; every later caller gets `false` and must
    /// not fire the completion callback.
    pub(crate) fn claim_terminal(&self, next: TransferState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_settling() {
            return false;
        }
        *state = next;
        true
    }

    /// Records the final outcome after a successful claim.
    pub(crate) fn settle(&self, success: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = if success {
            TransferState::Completed
        } else {
            TransferState::Failed
        };
    }

    /// Opens a progress dispatch, moving `Queued` to `Transferring`.
    ///
    /// Returns `None` once a terminal outcome has been claimed, or while
    /// another dispatch for this record is still open.
    pub(crate) fn progress_dispatch(&self) -> Option<ProgressDispatch<'_>> {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.dispatching || !self.mark_transferring() {
            return None;
        }
        gate.dispatching = true;
        Some(ProgressDispatch { record: self })
    }

    /// Delivers the terminal outcome after a successful claim: `on_saved`
    /// with the final path (success only), then `on_completion`.
    ///
    /// Inside an open progress dispatch the delivery is parked until the
    /// dispatch closes. Callbacks are taken, so this delivers at most once.
    pub(crate) fn fire_completion(&self, saved_path: Option<PathBuf>) {
        {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if gate.dispatching {
                gate.parked = Some(saved_path);
                return;
            }
        }
        self.deliver(saved_path);
    }

    fn close_dispatch(&self) {
        let parked = {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            gate.dispatching = false;
            gate.parked.take()
        };
        if let Some(saved_path) = parked {
            self.deliver(saved_path);
        }
    }

    fn deliver(&self, saved_path: Option<PathBuf>) {
        let success = saved_path.is_some();
        if let Some(path) = saved_path {
            let on_saved = self.on_saved.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(on_saved) = on_saved {
                on_saved(&path);
            }
        }
        let completion = self
            .on_completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(completion) = completion {
            completion(success);
        }
    }
}

/// An open progress dispatch; closing it (on drop) delivers a parked
/// completion.
pub(crate) struct ProgressDispatch<'a> {
    record: &'a TransferRecord,
}

impl ProgressDispatch<'_> {
    /// True while no terminal outcome has been claimed.
    pub(crate) fn is_live(&self) -> bool {
        !self.record.state().is_settling()
    }
}

impl Drop for ProgressDispatch<'_> {
    fn drop(&mut self) {
        self.record.close_dispatch();
    }
}

impl fmt::Debug for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRecord")
            .field("source_url", &self.source_url.as_str())
            .field("file_name", &self.file_name)
            .field("display_name", &self.display_name)
            .field("destination_dir", &self.destination_dir)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
