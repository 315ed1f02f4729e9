//! Registry of active transfers keyed by source URL.
//!
//! The registry is the single synchronization point for the "one in-flight
//! transfer per URL" rule. Every operation runs under one lock, so an insert
//! racing another insert (or a bulk drain) is applied atomically.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, instrument};
use url::Url;

use crate::transfer::TransferRecord;

/// Table of active transfers.
///
/// Designed to be shared behind an `Arc` by the coordinator; records are
/// stored as `Arc<TransferRecord>` so event handlers can keep working on a
/// record after releasing the lock.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: RwLock<HashMap<String, Arc<TransferRecord>>>,
}

impl TransferRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` under `url` unless the URL is already tracked.
    ///
    /// Returns false, leaving the registry untouched, for a duplicate URL.
    #[instrument(level = "debug", skip(self, record), fields(url = %url))]
    pub fn insert(&self, url: &Url, record: Arc<TransferRecord>) -> bool {
        let mut transfers = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if transfers.contains_key(url.as_str()) {
            debug!("url already registered");
            return false;
        }
        transfers.insert(url.as_str().to_string(), record);
        true
    }

    /// Returns the record for `url`, if any.
    #[must_use]
    pub fn lookup(&self, url: &Url) -> Option<Arc<TransferRecord>> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
            .cloned()
    }

    /// Returns true when `url` is tracked.
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url.as_str())
    }

    /// Removes and returns the record for `url`; repeated calls return `None`.
    pub fn remove(&self, url: &Url) -> Option<Arc<TransferRecord>> {
        self.transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url.as_str())
    }

    /// Removes `record` only if it is still the one registered for its URL.
    ///
    /// A transfer that was cancelled and then restarted for the same URL must
    /// not be dropped by the late cleanup of the old one.
    pub fn remove_record(&self, record: &Arc<TransferRecord>) -> bool {
        let mut transfers = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = record.source_url().as_str();
        if transfers
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            transfers.remove(key);
            true
        } else {
            false
        }
    }

    /// Empties the registry, returning everything that was tracked.
    pub fn remove_all(&self) -> Vec<Arc<TransferRecord>> {
        let drained: Vec<_> = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, record)| record)
            .collect();
        debug!(count = drained.len(), "registry drained");
        drained
    }

    /// Snapshot of the tracked URLs.
    #[must_use]
    pub fn active_urls(&self) -> Vec<Url> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|record| record.source_url().clone())
            .collect()
    }

    /// Number of tracked transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use super::*;
    use crate::transfer::DownloadRequest;
    use crate::transport::TransportTask;

    struct NoopTask;

    impl TransportTask for NoopTask {
        fn resume(&self) {}
        fn cancel(&self) {}
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn record(raw: &str) -> Arc<TransferRecord> {
        Arc::new(TransferRecord::new(
            DownloadRequest::new(url(raw), "files"),
            Box::new(NoopTask),
        ))
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = TransferRegistry::new();
        let u = url("https://x.test/a.bin");
        assert!(registry.insert(&u, record(u.as_str())));
        assert!(registry.contains(&u));
        assert_eq!(
            registry.lookup(&u).unwrap().source_url().as_str(),
            "https://x.test/a.bin"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_rejected_without_mutation() {
        let registry = TransferRegistry::new();
        let u = url("https://x.test/a.bin");
        let first = record(u.as_str());
        assert!(registry.insert(&u, Arc::clone(&first)));
        assert!(!registry.insert(&u, record(u.as_str())));
        assert!(Arc::ptr_eq(&registry.lookup(&u).unwrap(), &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = TransferRegistry::new();
        let u = url("https://x.test/a.bin");
        registry.insert(&u, record(u.as_str()));
        assert!(registry.remove(&u).is_some());
        assert!(registry.remove(&u).is_none());
        assert!(registry.lookup(&u).is_none());
    }

    #[test]
    fn test_remove_record_ignores_replaced_entry() {
        let registry = TransferRegistry::new();
        let u = url("https://x.test/a.bin");
        let old = record(u.as_str());
        registry.insert(&u, Arc::clone(&old));
        registry.remove(&u);

        let new = record(u.as_str());
        registry.insert(&u, Arc::clone(&new));

        assert!(!registry.remove_record(&old), "stale record must not evict");
        assert!(registry.contains(&u));
        assert!(registry.remove_record(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_all_drains_everything() {
        let registry = TransferRegistry::new();
        for raw in ["https://x.test/a", "https://x.test/b", "https://x.test/c"] {
            registry.insert(&url(raw), record(raw));
        }
        let drained = registry.remove_all();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
        assert!(registry.active_urls().is_empty());
        assert!(registry.remove_all().is_empty());
    }

    #[test]
    fn test_active_urls_snapshot() {
        let registry = TransferRegistry::new();
        registry.insert(&url("https://x.test/a"), record("https://x.test/a"));
        registry.insert(&url("https://x.test/b"), record("https://x.test/b"));
        let mut urls: Vec<String> = registry
            .active_urls()
            .into_iter()
            .map(String::from)
            .collect();
        urls.sort();
        assert_eq!(urls, vec!["https://x.test/a", "https://x.test/b"]);
    }

    #[test]
    fn test_concurrent_inserts_for_same_url_admit_exactly_one() {
        let registry = Arc::new(TransferRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let u = url("https://x.test/contended.bin");
                    registry.insert(&u, record(u.as_str()))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
