//! Runtime configuration for a download session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::finalize::CollisionPolicy;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for foreground transfers (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Directory name used under the platform cache dir.
const CACHE_DIR_NAME: &str = "download-manager";

/// Directory (under the caches root) holding in-flight bodies by default.
const INCOMING_DIR_NAME: &str = ".incoming";

/// Settings shared by the coordinator, finalizer, and HTTP transport.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root under which every destination directory is resolved.
    pub caches_root: PathBuf,
    /// Where transports spool bodies; defaults to `<caches_root>/.incoming`
    /// so finalization is a same-filesystem rename.
    pub temp_dir: Option<PathBuf>,
    /// Behaviour when the destination file already exists.
    pub collision_policy: CollisionPolicy,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Total request timeout for foreground transfers. Background transfers
    /// only use the connect timeout.
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            caches_root: default_caches_root(),
            temp_dir: None,
            collision_policy: CollisionPolicy::default(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

impl SessionConfig {
    /// Creates a default configuration rooted at `caches_root`.
    #[must_use]
    pub fn with_caches_root(caches_root: impl Into<PathBuf>) -> Self {
        Self {
            caches_root: caches_root.into(),
            ..Self::default()
        }
    }

    /// Sets the collision policy.
    #[must_use]
    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Sets the directory used for in-flight bodies.
    #[must_use]
    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Sets the connect and read timeouts.
    #[must_use]
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Resolved temp directory.
    #[must_use]
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.caches_root.join(INCOMING_DIR_NAME))
    }

    /// Returns the caches root.
    #[must_use]
    pub fn caches_root(&self) -> &Path {
        &self.caches_root
    }
}

/// Platform cache directory for this tool, or the system temp dir when the
/// platform has none.
#[must_use]
pub fn default_caches_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
}
