//! Access metadata write-back
//!
//! Reads bump `access_count`/`accessed_at` on the returned entry right away;
//! persisting that change is handed to a supervised worker through a bounded
//! queue. A full queue applies backpressure to readers instead of dropping
//! updates, and shutdown drains whatever is still queued.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::memory::MemoryEntry;

/// Persists an access update for one entry.
#[async_trait]
pub trait AccessSink: Send + Sync + 'static {
    async fn record_access(&self, entry: &MemoryEntry) -> Result<()>;
}

#[derive(Debug, Default)]
struct RecorderCounters {
    applied: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Background worker applying access updates through an [`AccessSink`].
pub struct AccessRecorder {
    name: String,
    tx: mpsc::Sender<MemoryEntry>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<RecorderCounters>,
}

impl AccessRecorder {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(name: impl Into<String>, sink: Arc<dyn AccessSink>, capacity: usize) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let token = CancellationToken::new();
        let counters = Arc::new(RecorderCounters::default());

        let handle = tokio::spawn(run_worker(
            name.clone(),
            sink,
            rx,
            token.clone(),
            counters.clone(),
        ));

        Self {
            name,
            tx,
            token,
            handle: Mutex::new(Some(handle)),
            counters,
        }
    }

    /// Queue an update, waiting for room when the queue is full.
    pub async fn record(&self, entry: MemoryEntry) {
        if self.token.is_cancelled() || self.tx.send(entry).await.is_err() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{} access recorder is stopped, update dropped", self.name);
        }
    }

    /// Number of updates waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn applied(&self) -> u64 {
        self.counters.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> Vec<(String, u64)> {
        vec![
            ("access_applied".to_string(), self.applied()),
            ("access_failed".to_string(), self.failed()),
            (
                "access_rejected".to_string(),
                self.counters.rejected.load(Ordering::Relaxed),
            ),
            ("access_pending".to_string(), self.pending() as u64),
        ]
    }

    /// Stop accepting updates, apply everything queued, and wait for the worker.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("{} access recorder panicked: {}", self.name, e);
            }
        }
    }
}

impl Drop for AccessRecorder {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Holder for a tier's recorder. Started on initialize, stopped and
/// cleared on shutdown so a tier can be initialized again.
#[derive(Default)]
pub struct RecorderSlot {
    inner: Mutex<Option<Arc<AccessRecorder>>>,
}

impl RecorderSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<AccessRecorder>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start_with(&self, spawn: impl FnOnce() -> AccessRecorder) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(Arc::new(spawn()));
        }
    }

    pub fn current(&self) -> Option<Arc<AccessRecorder>> {
        self.lock().clone()
    }

    /// Queue an update if a recorder is running.
    pub async fn record(&self, entry: MemoryEntry) {
        if let Some(recorder) = self.current() {
            recorder.record(entry).await;
        }
    }

    pub async fn stop(&self) {
        let recorder = self.lock().take();
        if let Some(recorder) = recorder {
            recorder.shutdown().await;
        }
    }

    pub fn counters(&self) -> Vec<(String, u64)> {
        self.current()
            .map(|recorder| recorder.counters())
            .unwrap_or_default()
    }
}

async fn apply(name: &str, sink: &dyn AccessSink, entry: MemoryEntry, counters: &RecorderCounters) {
    match sink.record_access(&entry).await {
        Ok(()) => {
            counters.applied.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("{} access update for {} failed: {}", name, entry.key, e);
        }
    }
}

async fn run_worker(
    name: String,
    sink: Arc<dyn AccessSink>,
    mut rx: mpsc::Receiver<MemoryEntry>,
    token: CancellationToken,
    counters: Arc<RecorderCounters>,
) {
    tracing::debug!("{} access recorder started", name);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                rx.close();
                let mut drained = 0;
                while let Some(entry) = rx.recv().await {
                    apply(&name, sink.as_ref(), entry, &counters).await;
                    drained += 1;
                }
                tracing::debug!("{} access recorder drained {} updates", name, drained);
                break;
            }
            next = rx.recv() => match next {
                Some(entry) => apply(&name, sink.as_ref(), entry, &counters).await,
                None => break,
            },
        }
    }
    tracing::debug!("{} access recorder stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<(String, u64)>>,
        delay: Duration,
    }

    #[async_trait]
    impl AccessSink for CollectingSink {
        async fn record_access(&self, entry: &MemoryEntry) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.seen
                .lock()
                .unwrap()
                .push((entry.key.clone(), entry.metadata.access_count));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AccessSink for FailingSink {
        async fn record_access(&self, _entry: &MemoryEntry) -> Result<()> {
            Err(crate::error::StrataError::ConnectionFailure("down".into()))
        }
    }

    fn accessed(key: &str, times: u64) -> MemoryEntry {
        let mut entry = MemoryEntry::new(key, "v");
        for _ in 0..times {
            entry.mark_accessed();
        }
        entry
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let sink = Arc::new(CollectingSink {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let recorder = AccessRecorder::spawn("test", sink.clone(), 4);

        for i in 0..10 {
            recorder.record(accessed(&format!("k{i}"), i)).await;
        }
        recorder.shutdown().await;

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[9], ("k9".to_string(), 9));
        assert_eq!(recorder.applied(), 10);
    }

    #[tokio::test]
    async fn test_updates_after_shutdown_are_rejected() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = AccessRecorder::spawn("test", sink.clone(), 4);
        recorder.shutdown().await;

        recorder.record(accessed("late", 1)).await;

        assert!(sink.seen.lock().unwrap().is_empty());
        let counters: std::collections::HashMap<_, _> = recorder.counters().into_iter().collect();
        assert_eq!(counters["access_rejected"], 1);
    }

    #[tokio::test]
    async fn test_slot_restarts_after_stop() {
        let sink = Arc::new(CollectingSink::default());
        let slot = RecorderSlot::default();

        slot.start_with(|| AccessRecorder::spawn("test", sink.clone(), 4));
        slot.record(accessed("a", 1)).await;
        slot.stop().await;
        assert!(slot.current().is_none());

        slot.record(accessed("dropped", 1)).await;
        slot.start_with(|| AccessRecorder::spawn("test", sink.clone(), 4));
        slot.record(accessed("b", 1)).await;
        slot.stop().await;

        let keys: Vec<_> = sink.seen.lock().unwrap().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_sink_failures_are_counted() {
        let recorder = AccessRecorder::spawn("test", Arc::new(FailingSink), 4);
        recorder.record(accessed("k", 1)).await;
        recorder.shutdown().await;

        assert_eq!(recorder.failed(), 1);
        assert_eq!(recorder.applied(), 0);
    }
}
