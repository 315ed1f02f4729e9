//! Error types for moving finished downloads into place.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while finalizing a transfer.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The destination directory is absolute or escapes the caches root.
    #[error("invalid destination directory {directory:?}: must be relative to the caches root")]
    InvalidDestination {
        /// The rejected directory name.
        directory: String,
    },

    /// The destination directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreationFailed {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A file already exists at the destination and the collision policy is `fail`.
    #[error("destination {path} already exists")]
    DestinationExists {
        /// The occupied destination path.
        path: PathBuf,
    },

    /// Moving the temporary file to its destination failed.
    #[error("failed to move {from} to {to}: {source}")]
    MoveFailed {
        /// The temporary file location.
        from: PathBuf,
        /// The intended destination.
        to: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FinalizeError {
    /// Creates an invalid destination error.
    pub fn invalid_destination(directory: impl Into<String>) -> Self {
        Self::InvalidDestination {
            directory: directory.into(),
        }
    }

    /// Creates a directory creation error.
    pub fn directory_creation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreationFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a destination collision error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        Self::DestinationExists { path: path.into() }
    }

    /// Creates a move error.
    pub fn move_failed(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::MoveFailed {
            from: from.into(),
            to: to.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_error_display_includes_paths() {
        let error = FinalizeError::move_failed(
            "/tmp/transfer-1.part",
            "/cache/files/a.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = error.to_string();
        assert!(msg.contains("/tmp/transfer-1.part"), "Expected source in: {msg}");
        assert!(msg.contains("/cache/files/a.bin"), "Expected destination in: {msg}");
    }

    #[test]
    fn test_invalid_destination_display() {
        let msg = FinalizeError::invalid_destination("../etc").to_string();
        assert!(msg.contains("../etc"), "Expected directory in: {msg}");
    }

    #[test]
    fn test_destination_exists_display() {
        let msg = FinalizeError::destination_exists("/cache/files/a.bin").to_string();
        assert!(msg.contains("already exists"), "Expected reason in: {msg}");
    }
}
