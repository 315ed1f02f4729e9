//! Moving completed downloads to their permanent location.
//!
//! The [`Finalizer`] resolves `<caches_root>/<destination_dir>/<file_name>`,
//! creates missing directories, and moves (never copies, unless the temp file
//! lives on another filesystem) the temporary download into place.
//!
//! Under [`CollisionPolicy::Fail`] and [`CollisionPolicy::Rename`] the
//! destination name is claimed atomically (a hard link, or an exclusive create
//! when links are unavailable), so concurrent finalizations into the same
//! directory never replace each other's files.
//!
//! Finalization consumes its input: calling it twice for the same temporary
//! file fails the second time with [`FinalizeError::MoveFailed`] (or
//! [`FinalizeError::DestinationExists`] under [`CollisionPolicy::Fail`]).
//!
//! # Example
//!
//! ```no_run
//! use download_manager::finalize::{CollisionPolicy, Finalizer};
//! use std::path::Path;
//!
//! let finalizer = Finalizer::new("/var/cache/app", CollisionPolicy::Rename);
//! let path = finalizer.finalize(Path::new("/tmp/transfer-1.part"), "files", "a.bin")?;
//! println!("saved to {}", path.display());
//! # Ok::<(), download_manager::finalize::FinalizeError>(())
//! ```

mod error;
mod filename;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, instrument, warn};

pub use error::FinalizeError;
pub use filename::{default_file_name, sanitize_filename};

use filename::{is_relative_plain_path, safe_file_name, unique_path_candidates};

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Fail the transfer, keeping the existing file.
    #[default]
    Fail,
    /// Replace the existing file.
    Overwrite,
    /// Save under `name_1.ext`, `name_2.ext`, ...
    Rename,
}

impl CollisionPolicy {
    /// Returns the stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Overwrite => "overwrite",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collision policy label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collision policy {0:?}: expected one of fail, overwrite, rename")]
pub struct ParseCollisionPolicyError(String);

impl FromStr for CollisionPolicy {
    type Err = ParseCollisionPolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "overwrite" => Ok(Self::Overwrite),
            "rename" => Ok(Self::Rename),
            _ => Err(ParseCollisionPolicyError(value.to_string())),
        }
    }
}

/// Places finished downloads under a caches root.
#[derive(Debug, Clone)]
pub struct Finalizer {
    caches_root: PathBuf,
    collision_policy: CollisionPolicy,
}

impl Finalizer {
    /// Creates a finalizer writing under `caches_root`.
    #[must_use]
    pub fn new(caches_root: impl Into<PathBuf>, collision_policy: CollisionPolicy) -> Self {
        Self {
            caches_root: caches_root.into(),
            collision_policy,
        }
    }

    /// Returns the caches root.
    #[must_use]
    pub fn caches_root(&self) -> &Path {
        &self.caches_root
    }

    /// Returns the configured collision policy.
    #[must_use]
    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision_policy
    }

    /// Resolves `destination_dir` under the caches root.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::InvalidDestination`] if the directory is
    /// absolute or contains `..`.
    pub fn resolve_directory(&self, destination_dir: &str) -> Result<PathBuf, FinalizeError> {
        let relative = Path::new(destination_dir);
        if !is_relative_plain_path(relative) {
            return Err(FinalizeError::invalid_destination(destination_dir));
        }
        Ok(self.caches_root.join(relative))
    }

    /// Moves `temp_location` to `<caches_root>/<destination_dir>/<file_name>`.
    ///
    /// Missing directories (including intermediate ones) are created first.
    /// Must run at most once per transfer; failures are not retried.
    ///
    /// # Errors
    ///
    /// - [`FinalizeError::InvalidDestination`] for an unsafe directory name
    /// - [`FinalizeError::DirectoryCreationFailed`] if the directory cannot be created
    /// - [`FinalizeError::DestinationExists`] on collision under [`CollisionPolicy::Fail`]
    /// - [`FinalizeError::MoveFailed`] if the move itself fails (e.g. the
    ///   temporary file was already consumed)
    #[instrument(skip(self), fields(temp = %temp_location.display(), policy = %self.collision_policy))]
    pub fn finalize(
        &self,
        temp_location: &Path,
        destination_dir: &str,
        file_name: &str,
    ) -> Result<PathBuf, FinalizeError> {
        let directory = self.resolve_directory(destination_dir)?;

        if !directory.is_dir() {
            debug!(directory = %directory.display(), "creating destination directory");
            fs::create_dir_all(&directory)
                .map_err(|e| FinalizeError::directory_creation(&directory, e))?;
        }

        let destination = self.place(temp_location, &directory, file_name)?;

        info!(path = %destination.display(), "download finalized");
        Ok(destination)
    }

    fn place(
        &self,
        temp_location: &Path,
        directory: &Path,
        file_name: &str,
    ) -> Result<PathBuf, FinalizeError> {
        match self.collision_policy {
            CollisionPolicy::Overwrite => {
                let path = directory.join(safe_file_name(file_name));
                move_file(temp_location, &path)?;
                Ok(path)
            }
            CollisionPolicy::Fail => {
                let path = directory.join(safe_file_name(file_name));
                match claim_destination(temp_location, &path)? {
                    Claim::Placed => Ok(path),
                    Claim::Taken => Err(FinalizeError::destination_exists(path)),
                }
            }
            CollisionPolicy::Rename => {
                let mut last = None;
                for candidate in unique_path_candidates(directory, file_name) {
                    match claim_destination(temp_location, &candidate)? {
                        Claim::Placed => return Ok(candidate),
                        Claim::Taken => {
                            debug!(path = %candidate.display(), "name taken, trying next");
                            last = Some(candidate);
                        }
                    }
                }
                let path = last.unwrap_or_else(|| directory.join(safe_file_name(file_name)));
                Err(FinalizeError::destination_exists(path))
            }
        }
    }
}

/// Outcome of an exclusive placement attempt.
enum Claim {
    Placed,
    Taken,
}

/// Removes a temporary download that will never be finalized (best effort).
pub fn discard_temp_file(temp_location: &Path) {
    match fs::remove_file(temp_location) {
        Ok(()) => debug!(path = %temp_location.display(), "discarded temporary download"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %temp_location.display(),
            error = %e,
            "failed to discard temporary download"
        ),
    }
}

fn move_file(from: &Path, to: &Path) -> Result<(), FinalizeError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "rename crosses devices, copying");
            fs::copy(from, to).map_err(|e| FinalizeError::move_failed(from, to, e))?;
            fs::remove_file(from).map_err(|e| FinalizeError::move_failed(from, to, e))
        }
        Err(e) => Err(FinalizeError::move_failed(from, to, e)),
    }
}

/// Moves `from` to `to` only if nothing exists at `to` yet.
///
/// The existence check and the placement are one filesystem operation.
fn claim_destination(from: &Path, to: &Path) -> Result<Claim, FinalizeError> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            release_source(from);
            Ok(Claim::Placed)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Claim::Taken),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FinalizeError::move_failed(from, to, e)),
        Err(e) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %e,
                "hard link unavailable, copying exclusively"
            );
            copy_exclusive(from, to)
        }
    }
}

fn copy_exclusive(from: &Path, to: &Path) -> Result<Claim, FinalizeError> {
    let mut source = File::open(from).map_err(|e| FinalizeError::move_failed(from, to, e))?;
    let mut target = match OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(Claim::Taken),
        Err(e) => return Err(FinalizeError::move_failed(from, to, e)),
    };

    if let Err(e) = io::copy(&mut source, &mut target).and_then(|_| target.sync_all()) {
        drop(target);
        let _ = fs::remove_file(to);
        return Err(FinalizeError::move_failed(from, to, e));
    }

    release_source(from);
    Ok(Claim::Placed)
}

/// Removes the temporary file once its content is in place.
fn release_source(from: &Path) {
    if let Err(e) = fs::remove_file(from) {
        warn!(path = %from.display(), error = %e, "failed to remove temporary download after placing it");
    }
}
