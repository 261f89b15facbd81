//! Deferred Submission Queue
//!
//! Holds best-effort mutating requests (analytics beacons, form posts) that
//! failed because the network was unreachable, and replays them once
//! connectivity returns.
//!
//! - `enqueue` always succeeds; the caller has already answered the page
//! - `flush` replays every entry in enqueue order, one at a time; a failed
//!   replay does not stop the rest, and the queue is cleared afterwards
//!   whatever the individual outcomes (no re-queue, no backoff)
//!
//! The queue lives in memory by default. [`DeferredSubmissionQueue::durable`]
//! additionally journals entries into a sled tree keyed by enqueue time so they
//! survive a restart.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::StoreError;
use crate::clock::Clock;
use crate::fetch::Fetcher;
use crate::router::InterceptedRequest;

/// A parked submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub target_url: String,
    pub payload: Bytes,
    pub content_type: Option<String>,
    pub enqueued_at_ms: i64,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub attempted: usize,
    /// Replays answered with a 2xx
    pub delivered: usize,
    /// Transport failures, error statuses and unparseable URLs
    pub failed: usize,
}

struct Slot {
    journal_key: Option<[u8; 16]>,
    entry: DeferredEntry,
}

pub struct DeferredSubmissionQueue {
    entries: Mutex<VecDeque<Slot>>,
    journal: Option<sled::Tree>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl DeferredSubmissionQueue {
    /// In-memory queue, emptied on restart
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            journal: None,
            seq: AtomicU64::new(0),
            clock,
        }
    }

    /// Queue journaled in `tree`; entries left by a previous run are reloaded
    pub fn durable(tree: sled::Tree, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let mut entries = VecDeque::new();
        for item in tree.iter() {
            let (key, value) = item?;
            match (
                <[u8; 16]>::try_from(key.as_ref()),
                rmp_serde::from_slice::<DeferredEntry>(&value),
            ) {
                (Ok(journal_key), Ok(entry)) => entries.push_back(Slot {
                    journal_key: Some(journal_key),
                    entry,
                }),
                _ => {
                    warn!("Dropping unreadable deferred queue journal entry");
                    tree.remove(&key)?;
                }
            }
        }

        if !entries.is_empty() {
            info!(count = entries.len(), "Reloaded deferred submissions from journal");
        }

        let seq = AtomicU64::new(entries.len() as u64);
        Ok(Self {
            entries: Mutex::new(entries),
            journal: Some(tree),
            seq,
            clock,
        })
    }

    fn journal_key(&self, enqueued_at_ms: i64) -> [u8; 16] {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&(enqueued_at_ms as u64).to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }

    /// Park a submission for later replay
    pub async fn enqueue(&self, target_url: &Url, payload: Bytes, content_type: Option<&str>) {
        let entry = DeferredEntry {
            target_url: target_url.to_string(),
            payload,
            content_type: content_type.map(|s| s.to_string()),
            enqueued_at_ms: self.clock.now_ms(),
        };

        let mut journal_key = None;
        if let Some(ref journal) = self.journal {
            let key = self.journal_key(entry.enqueued_at_ms);
            let written = rmp_serde::to_vec(&entry)
                .map_err(|e| StoreError::Codec(e.to_string()))
                .and_then(|bytes| journal.insert(key, bytes).map_err(StoreError::from));
            match written {
                Ok(_) => journal_key = Some(key),
                Err(e) => warn!(error = %e, "Deferred entry not journaled, keeping in memory only"),
            }
        }

        debug!(url = %entry.target_url, size = entry.payload.len(), "Submission deferred");
        self.entries.lock().await.push_back(Slot { journal_key, entry });
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copy of the queued entries in order
    pub async fn snapshot(&self) -> Vec<DeferredEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|slot| slot.entry.clone())
            .collect()
    }

    /// Replay every queued entry in order, then forget them all.
    /// Entries enqueued while a flush is running wait for the next flush.
    pub async fn flush(&self, fetcher: &dyn Fetcher) -> FlushReport {
        let drained: Vec<Slot> = {
            let mut entries = self.entries.lock().await;
            entries.drain(..).collect()
        };

        let mut report = FlushReport::default();
        if drained.is_empty() {
            return report;
        }

        info!(count = drained.len(), "Replaying deferred submissions");

        for slot in &drained {
            report.attempted += 1;
            let entry = &slot.entry;

            let url = match Url::parse(&entry.target_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %entry.target_url, error = %e, "Deferred entry has invalid URL");
                    report.failed += 1;
                    continue;
                }
            };

            let request =
                InterceptedRequest::post(url, entry.payload.clone(), entry.content_type.as_deref());
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => report.delivered += 1,
                Ok(response) => {
                    warn!(url = %entry.target_url, status = response.status, "Deferred replay rejected");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(url = %entry.target_url, error = %e, "Deferred replay failed");
                    report.failed += 1;
                }
            }
        }

        if let Some(ref journal) = self.journal {
            for key in drained.iter().filter_map(|slot| slot.journal_key) {
                if let Err(e) = journal.remove(key) {
                    warn!(error = %e, "Failed to clear deferred journal entry");
                }
            }
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Deferred submissions flushed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseRecord;
    use crate::clock::ManualClock;
    use crate::fetch::FetchError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records replayed URLs; URLs containing "fail" are unreachable
    #[derive(Default)]
    struct RecordingFetcher {
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for RecordingFetcher {
        async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseRecord, FetchError> {
            self.seen.lock().unwrap().push(request.url.to_string());
            if request.url.path().contains("fail") {
                Err(FetchError::Network("offline".into()))
            } else {
                Ok(ResponseRecord::new(204))
            }
        }
    }

    fn url(path: &str) -> Url {
        Url::parse("https://example.com").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_flush_is_ordered_and_best_effort() {
        let queue = DeferredSubmissionQueue::new(Arc::new(ManualClock::new(7)));
        queue.enqueue(&url("/api/analytics/e1"), Bytes::from_static(b"1"), None).await;
        queue.enqueue(&url("/api/analytics/fail"), Bytes::from_static(b"2"), None).await;
        queue.enqueue(&url("/api/analytics/e3"), Bytes::from_static(b"3"), None).await;
        assert_eq!(queue.len().await, 3);

        let fetcher = RecordingFetcher::default();
        let report = queue.flush(&fetcher).await;

        assert_eq!(
            *fetcher.seen.lock().unwrap(),
            vec![
                "https://example.com/api/analytics/e1",
                "https://example.com/api/analytics/fail",
                "https://example.com/api/analytics/e3",
            ]
        );
        assert_eq!(report, FlushReport { attempted: 3, delivered: 2, failed: 1 });
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_flush_empty_queue() {
        let queue = DeferredSubmissionQueue::new(Arc::new(ManualClock::new(0)));
        let report = queue.flush(&RecordingFetcher::default()).await;
        assert_eq!(report, FlushReport::default());
    }

    #[tokio::test]
    async fn test_entry_fields() {
        let queue = DeferredSubmissionQueue::new(Arc::new(ManualClock::new(1234)));
        queue
            .enqueue(&url("/api/analytics/x"), Bytes::from_static(b"{\"a\":1}"), Some("application/json"))
            .await;
        let entries = queue.snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].enqueued_at_ms, 1234);
        assert_eq!(entries[0].content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_durable_queue_survives_reload() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(100));

        {
            let queue = DeferredSubmissionQueue::durable(db.open_tree("deferred").unwrap(), Arc::clone(&clock)).unwrap();
            queue.enqueue(&url("/api/analytics/a"), Bytes::from_static(b"a"), None).await;
            queue.enqueue(&url("/api/analytics/b"), Bytes::from_static(b"b"), None).await;
        }

        let queue = DeferredSubmissionQueue::durable(db.open_tree("deferred").unwrap(), clock).unwrap();
        let entries = queue.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload.as_ref(), b"a");
        assert_eq!(entries[1].payload.as_ref(), b"b");

        queue.flush(&RecordingFetcher::default()).await;
        assert!(db.open_tree("deferred").unwrap().is_empty());
    }
}
