//! reqwest-backed transport streaming each transfer to a temporary file.
//!
//! Every transfer runs in its own Tokio task, held at a gate until
//! [`TransportTask::resume`] is called. The body is streamed chunk by chunk
//! into a uniquely named file under the session's temp directory, emitting a
//! progress event per chunk. The finished event is delivered from a blocking
//! task because the coordinator finalizes with synchronous file I/O.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{EventSink, Transport, TransportError, TransportTask};
use crate::session::SessionConfig;
use crate::transfer::TransferMode;
use crate::user_agent;

/// Prefix of spooled body files.
const TEMP_FILE_PREFIX: &str = "transfer-";

/// Suffix of spooled body files.
const TEMP_FILE_SUFFIX: &str = ".part";

/// HTTP transport with a foreground and a background channel.
///
/// The foreground client enforces the configured total timeout; the
/// background client only bounds connection setup, so long transfers are not
/// cut off. Must be created inside a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use download_manager::{HttpTransport, SessionConfig, SessionCoordinator};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::default();
/// let transport = HttpTransport::new(&config)?;
/// let coordinator = SessionCoordinator::new(config, transport);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    foreground: Client,
    background: Client,
    temp_dir: PathBuf,
    background_outstanding: Arc<AtomicUsize>,
    runtime: Handle,
}

impl HttpTransport {
    /// Builds both clients and ensures the temp directory exists.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NoRuntime`] outside a Tokio runtime
    /// - [`TransportError::ClientBuild`] if reqwest rejects the configuration
    /// - [`TransportError::Io`] if the temp directory cannot be created
    #[instrument(level = "debug", skip(config), fields(temp_dir = %config.resolved_temp_dir().display()))]
    pub fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let foreground = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .gzip(true)
            .user_agent(user_agent::default_download_user_agent())
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;
        let background = Client::builder()
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .user_agent(user_agent::default_download_user_agent())
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;

        let temp_dir = config.resolved_temp_dir();
        std::fs::create_dir_all(&temp_dir).map_err(|e| TransportError::io(&temp_dir, e))?;

        debug!(
            connect_timeout_secs = config.connect_timeout.as_secs(),
            read_timeout_secs = config.read_timeout.as_secs(),
            "creating HTTP transport"
        );

        Ok(Self {
            foreground,
            background,
            temp_dir,
            background_outstanding: Arc::new(AtomicUsize::new(0)),
            runtime,
        })
    }

    /// Number of background transfers not yet finished or cancelled.
    #[must_use]
    pub fn background_outstanding(&self) -> usize {
        self.background_outstanding.load(Ordering::SeqCst)
    }

    /// Directory where bodies are spooled.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("temp_dir", &self.temp_dir)
            .field("background_outstanding", &self.background_outstanding())
            .finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn begin_download(
        &self,
        url: &Url,
        mode: TransferMode,
        events: EventSink,
    ) -> Box<dyn TransportTask> {
        let client = match mode {
            TransferMode::Foreground => self.foreground.clone(),
            TransferMode::Background => self.background.clone(),
        };
        let slot = (mode == TransferMode::Background).then(|| {
            BackgroundSlot::acquire(Arc::clone(&self.background_outstanding), events.clone())
        });
        let (resume_tx, resume_rx) = oneshot::channel::<()>();
        let url = url.clone();
        let temp_dir = self.temp_dir.clone();

        debug!(url = %url, %mode, "creating transfer task");

        let join = self.runtime.spawn(async move {
            // Dropped with the task, so aborted transfers release the slot too.
            let _slot = slot;
            if resume_rx.await.is_err() {
                debug!(url = %url, "transfer dropped before resume");
                return;
            }
            run_transfer(&client, &url, &temp_dir, &events).await;
        });

        Box::new(HttpTask {
            resume: Mutex::new(Some(resume_tx)),
            abort: join.abort_handle(),
        })
    }
}

/// Suspended-until-resumed HTTP transfer.
struct HttpTask {
    resume: Mutex<Option<oneshot::Sender<()>>>,
    abort: AbortHandle,
}

impl TransportTask for HttpTask {
    fn resume(&self) {
        if let Some(gate) = self
            .resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = gate.send(());
        }
    }

    fn cancel(&self) {
        self.resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.abort.abort();
    }
}

/// Counts one outstanding background transfer for as long as it lives.
struct BackgroundSlot {
    outstanding: Arc<AtomicUsize>,
    events: EventSink,
}

impl BackgroundSlot {
    fn acquire(outstanding: Arc<AtomicUsize>, events: EventSink) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self {
            outstanding,
            events,
        }
    }
}

impl Drop for BackgroundSlot {
    fn drop(&mut self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("background queue drained");
            self.events.background_queue_drained();
        }
    }
}

#[instrument(skip(client, temp_dir, events), fields(url = %url))]
async fn run_transfer(client: &Client, url: &Url, temp_dir: &Path, events: &EventSink) {
    match fetch_to_temp(client, url, temp_dir, events).await {
        Ok((temp_location, status)) => {
            info!(status, path = %temp_location.display(), "transfer body received");
            let events = events.clone();
            let url = url.clone();
            let delivered = tokio::task::spawn_blocking(move || {
                events.finished(&url, &temp_location, Some(status));
            })
            .await;
            if let Err(e) = delivered {
                warn!(error = %e, "finish handler panicked");
            }
        }
        Err(error) => {
            warn!(error = %error, "transfer failed");
            events.error(url, error);
        }
    }
}

/// Streams the response body into a fresh temp file.
///
/// The file is deleted automatically if streaming fails or the task is
/// aborted; only a fully received body is kept.
async fn fetch_to_temp(
    client: &Client,
    url: &Url,
    temp_dir: &Path,
    events: &EventSink,
) -> Result<(PathBuf, u16), TransportError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;

    let status = response.status().as_u16();
    let expected = response.content_length();
    debug!(status, expected, "response received");

    let temp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(TEMP_FILE_SUFFIX)
        .tempfile_in(temp_dir)
        .map_err(|e| TransportError::io(temp_dir, e))?;
    let (file, temp_path) = temp.into_parts();
    let mut writer = BufWriter::new(tokio::fs::File::from_std(file));

    events.bytes_written(url, 0, expected);

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransportError::io(temp_path.to_path_buf(), e))?;
        written += chunk.len() as u64;
        events.bytes_written(url, written, expected);
    }

    writer
        .flush()
        .await
        .map_err(|e| TransportError::io(temp_path.to_path_buf(), e))?;
    drop(writer);

    let path = temp_path
        .keep()
        .map_err(|e| TransportError::io(e.path.to_path_buf(), e.error))?;
    Ok((path, status))
}
