//! Scripted transport: records every operation and lets tests emit events.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use download_manager::{EventSink, TransferMode, Transport, TransportError, TransportTask};
use url::Url;

/// One operation created through [`FakeTransport`].
#[derive(Debug)]
pub struct FakeOperation {
    pub url: Url,
    pub mode: TransferMode,
    pub events: EventSink,
    resumed: AtomicBool,
    cancelled: AtomicBool,
}

impl FakeOperation {
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self, written: u64, expected: Option<u64>) {
        self.events.bytes_written(&self.url, written, expected);
    }

    pub fn finish(&self, temp_location: &Path, http_status: Option<u16>) {
        self.events.finished(&self.url, temp_location, http_status);
    }

    pub fn fail(&self, reason: &str) {
        self.events
            .error(&self.url, TransportError::unavailable(self.url.as_str(), reason));
    }
}

struct FakeTask(Arc<FakeOperation>);

impl TransportTask for FakeTask {
    fn resume(&self) {
        self.0.resumed.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Transport that never touches the network.
#[derive(Clone, Default)]
pub struct FakeTransport {
    operations: Arc<Mutex<Vec<Arc<FakeOperation>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation created so far, in creation order.
    pub fn operations(&self) -> Vec<Arc<FakeOperation>> {
        self.operations.lock().unwrap().clone()
    }

    /// The most recent operation for `url`.
    pub fn operation(&self, url: &Url) -> Arc<FakeOperation> {
        self.operations()
            .into_iter()
            .rev()
            .find(|op| &op.url == url)
            .unwrap_or_else(|| panic!("no operation created for {url}"))
    }

    pub fn begin_count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }
}

impl Transport for FakeTransport {
    fn begin_download(
        &self,
        url: &Url,
        mode: TransferMode,
        events: EventSink,
    ) -> Box<dyn TransportTask> {
        let operation = Arc::new(FakeOperation {
            url: url.clone(),
            mode,
            events,
            resumed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        self.operations.lock().unwrap().push(Arc::clone(&operation));
        Box::new(FakeTask(operation))
    }
}

/// Writes `contents` to a fresh file under `dir`, standing in for a spooled body.
pub fn spool(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
