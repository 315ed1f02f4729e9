//! The seam between the coordinator and whatever actually moves bytes.
//!
//! A [`Transport`] creates one suspended [`TransportTask`] per download and
//! reports what happens to it through an [`EventSink`]. The coordinator never
//! talks HTTP itself; [`HttpTransport`] is the reqwest-backed implementation.
//!
//! Events for one URL must be delivered sequentially; events for different
//! URLs may arrive concurrently from any thread.

mod error;
pub mod http;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::transfer::TransferMode;

pub use error::TransportError;
pub use http::HttpTransport;

/// Handle to one in-flight transport operation.
///
/// Tasks are created suspended so the coordinator can register the transfer
/// before the first event can possibly arrive.
pub trait TransportTask: Send + Sync {
    /// Starts (or continues) the operation.
    fn resume(&self);

    /// Cancels the operation. Late events may still be delivered afterwards.
    fn cancel(&self);
}

/// Source of download operations.
pub trait Transport: Send + Sync {
    /// Creates a suspended download of `url` on the channel selected by `mode`,
    /// reporting its events to `events`.
    fn begin_download(&self, url: &Url, mode: TransferMode, events: EventSink)
    -> Box<dyn TransportTask>;
}

/// Receiver of transport events.
///
/// Implemented by the session coordinator; every method must tolerate events
/// for URLs it no longer tracks.
pub trait TransportEvents: Send + Sync {
    /// `written` of `expected` bytes have been received so far.
    fn bytes_written(&self, url: &Url, written: u64, expected: Option<u64>);

    /// The body is complete and spooled at `temp_location`.
    fn finished(&self, url: &Url, temp_location: &Path, http_status: Option<u16>);

    /// The transfer failed before completing.
    fn error(&self, url: &Url, error: TransportError);

    /// The background channel has no outstanding operations left.
    fn background_queue_drained(&self);
}

/// Typed transport event, for transports that queue events before delivery.
#[derive(Debug)]
pub enum TransportEvent {
    /// Progress for one transfer.
    BytesWritten {
        /// Source URL.
        url: Url,
        /// Total bytes received so far.
        written: u64,
        /// Total expected size, when the server announced one.
        expected: Option<u64>,
    },
    /// Body fully received.
    Finished {
        /// Source URL.
        url: Url,
        /// Where the body was spooled.
        temp_location: PathBuf,
        /// HTTP status of the response, when known.
        http_status: Option<u16>,
    },
    /// Transport-level failure.
    Error {
        /// Source URL.
        url: Url,
        /// What went wrong.
        error: TransportError,
    },
    /// No background operations remain.
    BackgroundQueueDrained,
}

/// Cloneable delivery handle passed to transports.
#[derive(Clone)]
pub struct EventSink {
    handler: Arc<dyn TransportEvents>,
}

impl EventSink {
    /// Wraps an event handler.
    #[must_use]
    pub fn new(handler: Arc<dyn TransportEvents>) -> Self {
        Self { handler }
    }

    /// Delivers a queued event.
    pub fn deliver(&self, event: TransportEvent) {
        dispatch(self.handler.as_ref(), event);
    }

    /// Reports progress.
    pub fn bytes_written(&self, url: &Url, written: u64, expected: Option<u64>) {
        self.handler.bytes_written(url, written, expected);
    }

    /// Reports a completed body.
    pub fn finished(&self, url: &Url, temp_location: &Path, http_status: Option<u16>) {
        self.handler.finished(url, temp_location, http_status);
    }

    /// Reports a transport failure.
    pub fn error(&self, url: &Url, error: TransportError) {
        self.handler.error(url, error);
    }

    /// Reports that the background channel is idle.
    pub fn background_queue_drained(&self) {
        self.handler.background_queue_drained();
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

pub(crate) fn dispatch(handler: &dyn TransportEvents, event: TransportEvent) {
    match event {
        TransportEvent::BytesWritten {
            url,
            written,
            expected,
        } => handler.bytes_written(&url, written, expected),
        TransportEvent::Finished {
            url,
            temp_location,
            http_status,
        } => handler.finished(&url, &temp_location, http_status),
        TransportEvent::Error { url, error } => handler.error(&url, error),
        TransportEvent::BackgroundQueueDrained => handler.background_queue_drained(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl TransportEvents for Recorder {
        fn bytes_written(&self, url: &Url, written: u64, expected: Option<u64>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("bytes {url} {written} {expected:?}"));
        }

        fn finished(&self, url: &Url, temp_location: &Path, http_status: Option<u16>) {
            self.seen.lock().unwrap().push(format!(
                "finished {url} {} {http_status:?}",
                temp_location.display()
            ));
        }

        fn error(&self, url: &Url, _error: TransportError) {
            self.seen.lock().unwrap().push(format!("error {url}"));
        }

        fn background_queue_drained(&self) {
            self.seen.lock().unwrap().push("drained".to_string());
        }
    }

    #[test]
    fn test_deliver_dispatches_each_event_kind() {
        let recorder = Arc::new(Recorder::default());
        let sink = EventSink::new(recorder.clone());
        let url = Url::parse("https://x.test/a.bin").unwrap();

        sink.deliver(TransportEvent::BytesWritten {
            url: url.clone(),
            written: 5,
            expected: Some(10),
        });
        sink.deliver(TransportEvent::Finished {
            url: url.clone(),
            temp_location: PathBuf::from("/tmp/t.part"),
            http_status: Some(200),
        });
        sink.deliver(TransportEvent::Error {
            url: url.clone(),
            error: TransportError::timeout(url.as_str()),
        });
        sink.deliver(TransportEvent::BackgroundQueueDrained);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "bytes https://x.test/a.bin 5 Some(10)".to_string(),
                "finished https://x.test/a.bin /tmp/t.part Some(200)".to_string(),
                "error https://x.test/a.bin".to_string(),
                "drained".to_string(),
            ]
        );
    }
}
