//! Filename derivation, sanitization, and collision candidates.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`, and rewrites
/// `.`/`..` so the result can never name a parent or current directory.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return String::new();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Default on-disk name for `url`: the percent-decoded last path segment,
/// or `download_<unix-ts>.bin` when the path has none.
#[must_use]
pub fn default_file_name(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.into()
        });
        let sanitized = sanitize_filename(&decoded);
        if !sanitized.trim_matches('_').is_empty() {
            return sanitized;
        }
    }

    format!("download_{}.bin", unix_timestamp())
}

/// Returns a filename safe to join onto a directory, falling back to
/// `download.bin` when nothing usable remains.
pub(crate) fn safe_file_name(name: &str) -> String {
    let sanitized = sanitize_filename(name);
    if sanitized.contains('/') || sanitized.contains('\\') || sanitized.trim_matches('_').is_empty()
    {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

/// Candidate paths in `dir` for `filename`, in claim order: the plain name,
/// then `_1`, `_2`, ... before the extension, then a timestamp suffix.
pub(crate) fn unique_path_candidates(dir: &Path, filename: &str) -> impl Iterator<Item = PathBuf> {
    let filename = safe_file_name(filename);
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (filename[..pos].to_string(), filename[pos..].to_string()),
        _ => (filename.clone(), String::new()),
    };
    let dir = dir.to_path_buf();

    std::iter::once(dir.join(&filename))
        .chain((1..1000).map({
            let dir = dir.clone();
            let (stem, ext) = (stem.clone(), ext.clone());
            move |i| dir.join(format!("{stem}_{i}{ext}"))
        }))
        .chain(std::iter::once_with(move || {
            dir.join(format!("{stem}_{}{ext}", unix_timestamp()))
        }))
}

/// Returns true if `path` only contains plain, relative components.
pub(crate) fn is_relative_plain_path(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
