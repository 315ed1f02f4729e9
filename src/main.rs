//! CLI entry point for the download-manager tool.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use download_manager::{
    DownloadRequest, HttpTransport, SessionConfig, SessionCoordinator, StartOutcome,
};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

mod app_config;
mod cli;

use cli::Args;

/// Progress bar resolution (per-mille).
const BAR_LENGTH: u64 = 1000;

/// How long to wait for the background drain signal after the last completion.
const BACKGROUND_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct TransferSummary {
    url: String,
    /// Requested name; `saved_path` differs when a collision was renamed.
    file_name: String,
    destination_dir: PathBuf,
    /// Where the file actually landed (successful transfers only).
    saved_path: Option<PathBuf>,
    success: bool,
}

/// Message sent by a transfer's completion callback.
type Finished = (Url, bool, Option<PathBuf>);

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    completed: usize,
    failed: usize,
    skipped: usize,
    interrupted: bool,
    transfers: Vec<TransferSummary>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    if args.output_name.is_some() && args.urls.len() > 1 {
        bail!("--output-name can only be used with a single URL");
    }

    let file_config = match &args.config {
        Some(path) => Some(app_config::load_file_config(path)?),
        None => {
            let loaded = app_config::load_default_file_config()?;
            if let (Some(path), Some(_)) = (&loaded.path, &loaded.config) {
                debug!(path = %path.display(), "loaded config file");
            }
            loaded.config
        }
    };

    let mut config = SessionConfig::default();
    if let Some(file_config) = &file_config {
        config = file_config.apply_to(config);
    }
    if let Some(root) = &args.caches_root {
        config.caches_root.clone_from(root);
    }
    if let Some(policy) = args.on_collision {
        config.collision_policy = policy;
    }

    let destination = config.caches_root.join(&args.destination_dir);
    info!(
        destination = %destination.display(),
        urls = args.urls.len(),
        "download-manager starting"
    );

    let transport =
        HttpTransport::new(&config).context("Failed to initialise the HTTP transport")?;
    let coordinator = SessionCoordinator::new(config, transport);

    let drained = args.background.then(|| {
        let (drained_tx, drained_rx) = oneshot::channel::<()>();
        let notification = file_config
            .as_ref()
            .and_then(|cfg| cfg.background_notification.clone());
        coordinator.set_background_completion_handler(
            move || {
                let _ = drained_tx.send(());
            },
            notification,
        );
        drained_rx
    });

    let hide_bars = args.quiet || args.json || !io::stderr().is_terminal();
    let progress = MultiProgress::with_draw_target(if hide_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    });
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Finished>();
    let mut summary = RunSummary::default();
    let mut pending = 0usize;

    for url in &args.urls {
        let mut request = DownloadRequest::new(url.clone(), args.destination_dir.as_str())
            .background(args.background);
        if let Some(name) = &args.output_name {
            request = request.file_name(name.as_str());
        }
        let file_name = request.resolved_file_name();

        let bar = progress.add(ProgressBar::new(BAR_LENGTH));
        bar.set_style(style.clone());
        bar.set_prefix(file_name.clone());

        let saved_path = Arc::new(Mutex::new(None::<PathBuf>));
        let request = request
            .on_progress({
                let bar = bar.clone();
                move |fraction| bar.set_position(per_mille(fraction))
            })
            .on_remaining_time({
                let bar = bar.clone();
                move |seconds| bar.set_message(format!("ETA {}", format_eta(seconds)))
            })
            .on_saved({
                let saved_path = Arc::clone(&saved_path);
                move |path| {
                    *saved_path.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(path.to_path_buf());
                }
            })
            .on_completion({
                let bar = bar.clone();
                let done_tx = done_tx.clone();
                let url = url.clone();
                move |success| {
                    if success {
                        bar.set_position(BAR_LENGTH);
                        bar.finish_with_message("done");
                    } else {
                        bar.abandon_with_message("failed");
                    }
                    let saved = saved_path
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    let _ = done_tx.send((url, success, saved));
                }
            });

        match coordinator.start(request) {
            StartOutcome::Started => {
                pending += 1;
                summary.transfers.push(TransferSummary {
                    url: url.to_string(),
                    file_name,
                    destination_dir: destination.clone(),
                    saved_path: None,
                    success: false,
                });
            }
            StartOutcome::AlreadyActive => {
                warn!(url = %url, "duplicate URL skipped");
                bar.finish_and_clear();
                summary.skipped += 1;
            }
        }
    }
    drop(done_tx);

    while pending > 0 {
        tokio::select! {
            done = done_rx.recv() => {
                let Some((url, success, saved_path)) = done else { break };
                pending -= 1;
                record_outcome(&mut summary, &url, success, saved_path);
            }
            signal = tokio::signal::ctrl_c(), if !summary.interrupted => {
                if signal.is_ok() {
                    warn!("interrupt received, cancelling downloads");
                    summary.interrupted = true;
                    coordinator.cancel_all();
                }
            }
        }
    }

    if let Some(drained_rx) = drained {
        if tokio::time::timeout(BACKGROUND_DRAIN_GRACE, drained_rx)
            .await
            .is_err()
        {
            debug!("background drain signal not received");
        }
    }

    info!(
        completed = summary.completed,
        failed = summary.failed,
        skipped = summary.skipped,
        "Download complete"
    );

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("Failed to render JSON summary")?;
        println!("{rendered}");
    }

    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn record_outcome(
    summary: &mut RunSummary,
    url: &Url,
    success: bool,
    saved_path: Option<PathBuf>,
) {
    if success {
        summary.completed += 1;
    } else {
        summary.failed += 1;
    }
    if let Some(entry) = summary
        .transfers
        .iter_mut()
        .find(|entry| entry.url == url.as_str())
    {
        entry.success = success;
        entry.saved_path = saved_path;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn per_mille(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64
}

/// Formats an ETA as `1h02m`, `3m05s` or `42s`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0).ceil() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m{secs:02}s")
    } else {
        format!("{secs}s")
    }
}
