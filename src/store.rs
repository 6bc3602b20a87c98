//! Batched store: accumulate records and flush them to a sink on a size OR
//! time watermark.
//!
//! ## Flush protocol
//!
//! ```text
//! add ──▶ append under buffer lock ──▶ due? ──▶ flush gate ──▶ re-check ──▶ swap out ──▶ write task
//!                                                  ▲                                        │
//! ticker (interval / 2) ──▶ due? ──────────────────┘              on Err: put batch back ◀──┘
//! ```
//!
//! * The buffer lock is a `std::sync::Mutex` held only for appends and swaps,
//!   never across an `.await`.
//! * The flush gate serialises flushes. Whoever gets the gate re-checks the
//!   watermark, so several simultaneous triggers produce one flush of the
//!   then-current buffer.
//! * The sink write runs in its own task, which owns both the taken batch and
//!   the gate. A caller that is dropped mid-flush cannot lose the batch or
//!   let a second flush overlap the first.
//! * A failed write puts the batch back in front of anything appended in the
//!   meantime, so storage order within the buffer is append order.

use crate::config::ExtractionConfig;
use crate::error::DirectoryError;
use crate::pipeline::backend::backoff_delay;
use crate::record::ProviderRecord;
use crate::sink::{RecordSink, SinkError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watermarks and retry policy for a [`BatchedStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Flush once this many records are pending.
    pub batch_size: usize,
    /// Flush once this much time has passed since the last flush.
    pub flush_interval: Duration,
    /// Extra attempts for the final flush.
    pub flush_retries: u32,
    /// Base delay between final-flush attempts, doubled each time.
    pub retry_backoff_ms: u64,
}

impl StoreConfig {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            flush_retries: config.flush_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

/// What the store is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreState {
    /// Nothing pending.
    Idle,
    /// Records pending, no write in progress.
    Accumulating,
    /// A batch is being written to the sink.
    Flushing,
}

/// Counters since the store was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Successful sink writes.
    pub flushes: usize,
    pub records_written: usize,
    /// Sink writes that failed; their batches went back into the buffer.
    pub failed_flushes: usize,
    /// Records waiting for the next flush.
    pub pending: usize,
}

struct Buffer {
    records: Vec<ProviderRecord>,
    last_flush: Instant,
    /// The last write failed; only the interval triggers the next attempt.
    backing_off: bool,
}

impl Buffer {
    fn is_due(&self, config: &StoreConfig) -> bool {
        if self.records.is_empty() {
            return false;
        }
        let interval_elapsed = self.last_flush.elapsed() >= config.flush_interval;
        if self.backing_off {
            interval_elapsed
        } else {
            self.records.len() >= config.batch_size || interval_elapsed
        }
    }
}

struct Shared {
    config: StoreConfig,
    sink: Arc<dyn RecordSink>,
    buffer: Mutex<Buffer>,
    gate: Arc<AsyncMutex<()>>,
    flushing: AtomicBool,
    flushes: AtomicUsize,
    records_written: AtomicUsize,
    failed_flushes: AtomicUsize,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accumulates records from concurrent producers and writes them in batches.
///
/// Construct with [`BatchedStore::new`] from inside a Tokio runtime; it
/// starts a background ticker that enforces `flush_interval` even when no
/// records arrive. Call [`BatchedStore::finish`] at the end of the run to
/// stop the ticker and write the remainder.
pub struct BatchedStore {
    shared: Arc<Shared>,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BatchedStore {
    pub fn new(sink: Arc<dyn RecordSink>, config: StoreConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            sink,
            buffer: Mutex::new(Buffer {
                records: Vec::new(),
                last_flush: Instant::now(),
                backing_off: false,
            }),
            gate: Arc::new(AsyncMutex::new(())),
            flushing: AtomicBool::new(false),
            flushes: AtomicUsize::new(0),
            records_written: AtomicUsize::new(0),
            failed_flushes: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let handle = spawn_ticker(Arc::clone(&shared), token.clone());
        debug!(
            "Store started: batch_size={}, flush_interval={:?}",
            config.batch_size, config.flush_interval
        );
        Self {
            shared,
            ticker: Mutex::new(Some((token, handle))),
        }
    }

    /// Append `records` and flush if a watermark is reached.
    ///
    /// A failed flush is logged and the records stay pending. The next
    /// attempt waits for the flush interval instead of the size watermark.
    pub async fn add(&self, records: Vec<ProviderRecord>) {
        let due = {
            let mut buf = self.shared.buffer();
            buf.records.extend(records);
            buf.is_due(&self.shared.config)
        };
        if due {
            if let Err(e) = flush_if_due(&self.shared, false).await {
                warn!("Flush failed, records kept for retry: {}", e);
            }
        }
    }

    /// Write everything pending now, regardless of watermarks.
    ///
    /// Returns the number of records written.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        flush_if_due(&self.shared, true).await
    }

    /// Stop the ticker and write the remainder.
    ///
    /// The final write is attempted `1 + flush_retries` times with backoff.
    pub async fn finish(&self) -> Result<StoreStats, DirectoryError> {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((token, handle)) = ticker {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Flush ticker ended abnormally: {}", e);
            }
        }

        let retries = self.shared.config.flush_retries;
        let mut attempt = 0u32;
        loop {
            match flush_if_due(&self.shared, true).await {
                Ok(_) => break,
                Err(e) if attempt >= retries => {
                    return Err(DirectoryError::FlushFailed {
                        pending: self.pending(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = backoff_delay(self.shared.config.retry_backoff_ms, attempt);
                    warn!(
                        "Final flush failed ({}); retry {}/{} after {}ms",
                        e,
                        attempt,
                        retries,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let stats = self.stats();
        info!(
            "Store finished: {} records in {} flushes ({} failed attempts)",
            stats.records_written, stats.flushes, stats.failed_flushes
        );
        Ok(stats)
    }

    pub fn state(&self) -> StoreState {
        if self.shared.flushing.load(Ordering::SeqCst) {
            StoreState::Flushing
        } else if self.pending() > 0 {
            StoreState::Accumulating
        } else {
            StoreState::Idle
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            flushes: self.shared.flushes.load(Ordering::SeqCst),
            records_written: self.shared.records_written.load(Ordering::SeqCst),
            failed_flushes: self.shared.failed_flushes.load(Ordering::SeqCst),
            pending: self.pending(),
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.buffer().records.len()
    }
}

impl Drop for BatchedStore {
    fn drop(&mut self) {
        if let Some((token, _handle)) = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// Flush the buffer when due (or unconditionally when `force`).
///
/// Returns the number of records written; `Ok(0)` when nothing was due.
async fn flush_if_due(shared: &Arc<Shared>, force: bool) -> Result<usize, SinkError> {
    let gate = Arc::clone(&shared.gate).lock_owned().await;

    let batch = {
        let mut buf = shared.buffer();
        let due = if force {
            !buf.records.is_empty()
        } else {
            buf.is_due(&shared.config)
        };
        if !due {
            return Ok(0);
        }
        std::mem::take(&mut buf.records)
    };

    let task_shared = Arc::clone(shared);
    let writer = tokio::spawn(async move {
        let _gate = gate;
        task_shared.flushing.store(true, Ordering::SeqCst);
        let n = batch.len();
        let result = task_shared.sink.store_batch(&batch).await;

        let mut buf = task_shared.buffer();
        buf.last_flush = Instant::now();
        buf.backing_off = result.is_err();
        let outcome = match result {
            Ok(()) => {
                task_shared.flushes.fetch_add(1, Ordering::SeqCst);
                task_shared.records_written.fetch_add(n, Ordering::SeqCst);
                debug!("Flushed {} records", n);
                Ok(n)
            }
            Err(e) => {
                task_shared.failed_flushes.fetch_add(1, Ordering::SeqCst);
                let newer = std::mem::replace(&mut buf.records, batch);
                buf.records.extend(newer);
                Err(e)
            }
        };
        drop(buf);
        task_shared.flushing.store(false, Ordering::SeqCst);
        outcome
    });

    writer
        .await
        .map_err(|e| SinkError::Write(format!("flush task failed: {e}")))?
}

fn spawn_ticker(shared: Arc<Shared>, token: CancellationToken) -> JoinHandle<()> {
    let period = (shared.config.flush_interval / 2).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    let due = shared.buffer().is_due(&shared.config);
                    if due {
                        if let Err(e) = flush_if_due(&shared, false).await {
                            warn!("Interval flush failed, records kept for retry: {}", e);
                        }
                    }
                }
            }
        }
        debug!("Flush ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Telehealth;
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    fn rec(name: &str) -> ProviderRecord {
        ProviderRecord {
            identifier: String::new(),
            name: name.into(),
            credentials: None,
            specialties: Vec::new(),
            practice_name: None,
            address: None,
            phone: None,
            telehealth: Telehealth::default(),
            languages: Vec::new(),
            county: None,
            source_page: 1,
        }
    }

    fn config(batch_size: usize, interval_ms: u64) -> StoreConfig {
        StoreConfig {
            batch_size,
            flush_interval: Duration::from_millis(interval_ms),
            flush_retries: 2,
            retry_backoff_ms: 1,
        }
    }

    /// Fails the first `failures` writes, then delegates to a MemorySink.
    struct FlakySink {
        failures: AtomicUsize,
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SinkError::Write("database is locked".into()));
            }
            self.inner.store_batch(records).await
        }
    }

    #[tokio::test]
    async fn size_watermark_flushes_once_and_finish_takes_the_rest() {
        let sink = Arc::new(MemorySink::new());
        let store = BatchedStore::new(sink.clone(), config(3, 60_000));

        store.add(vec![rec("a")]).await;
        store.add(vec![rec("b")]).await;
        assert!(sink.is_empty());
        assert_eq!(store.state(), StoreState::Accumulating);

        store.add(vec![rec("c")]).await;
        assert_eq!(sink.batch_sizes(), vec![3]);

        store.add(vec![rec("d")]).await;
        assert_eq!(sink.batch_sizes(), vec![3], "interval has not elapsed");

        let stats = store.finish().await.expect("finish");
        assert_eq!(sink.batch_sizes(), vec![3, 1]);
        assert_eq!(stats.records_written, 4);
        assert_eq!(stats.pending, 0);
        assert_eq!(store.state(), StoreState::Idle);
    }

    #[tokio::test]
    async fn elapsed_interval_flushes_on_add() {
        let sink = Arc::new(MemorySink::new());
        let store = BatchedStore::new(sink.clone(), config(3, 100));

        for name in ["a", "b", "c"] {
            store.add(vec![rec(name)]).await;
        }
        assert_eq!(sink.batch_sizes(), vec![3]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        store.add(vec![rec("d")]).await;
        assert_eq!(sink.batch_sizes(), vec![3, 1]);
        store.finish().await.expect("finish");
        assert_eq!(sink.len(), 4);
    }

    #[tokio::test]
    async fn ticker_flushes_an_idle_buffer() {
        let sink = Arc::new(MemorySink::new());
        let store = BatchedStore::new(sink.clone(), config(100, 50));

        store.add(vec![rec("a"), rec("b")]).await;
        assert!(sink.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batch_sizes(), vec![2]);
        store.finish().await.expect("finish");
        assert_eq!(sink.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn failed_flush_keeps_the_batch_in_order() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(1),
            inner: MemorySink::new(),
        });
        let store = BatchedStore::new(sink.clone(), config(2, 60_000));

        store.add(vec![rec("a"), rec("b")]).await;
        let stats = store.stats();
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.pending, 2);

        store.add(vec![rec("c")]).await;
        assert_eq!(store.stats().failed_flushes, 1, "no retry before the interval");
        assert_eq!(store.pending(), 3);

        assert_eq!(store.finish().await.expect("finish").flushes, 1);
        let names: Vec<String> = sink.inner.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failing_sink_is_retried_once_per_interval() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(2),
            inner: MemorySink::new(),
        });
        let store = BatchedStore::new(sink.clone(), config(1, 300));

        store.add(vec![rec("a")]).await;
        for name in ["b", "c", "d"] {
            store.add(vec![rec(name)]).await;
        }
        assert_eq!(store.stats().failed_flushes, 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        // The ticker retried once after each interval: one more failure,
        // then a successful write of everything pending.
        let stats = store.stats();
        assert_eq!(stats.failed_flushes, 2);
        assert_eq!(stats.pending, 0);
        assert_eq!(sink.inner.batch_sizes(), vec![4]);

        store.add(vec![rec("e")]).await;
        assert_eq!(sink.inner.batch_sizes(), vec![4, 1], "size watermark applies again after success");
        store.finish().await.expect("finish");
    }

    #[tokio::test]
    async fn finish_retries_then_reports_flush_failed() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(usize::MAX),
            inner: MemorySink::new(),
        });
        let store = BatchedStore::new(sink, config(100, 60_000));
        store.add(vec![rec("a"), rec("b"), rec("c")]).await;

        match store.finish().await {
            Err(DirectoryError::FlushFailed { pending, attempts, .. }) => {
                assert_eq!(pending, 3);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected FlushFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finish_recovers_from_a_transient_failure() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(1),
            inner: MemorySink::new(),
        });
        let store = BatchedStore::new(sink.clone(), config(100, 60_000));
        store.add(vec![rec("a")]).await;

        let stats = store.finish().await.expect("second attempt succeeds");
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(sink.inner.len(), 1);
    }

    /// Sleeps during every write so producers overlap with flushes.
    struct SlowSink {
        inner: MemorySink,
    }

    #[async_trait]
    impl RecordSink for SlowSink {
        async fn store_batch(&self, records: &[ProviderRecord]) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.inner.store_batch(records).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_with_slow_sink_lose_and_duplicate_nothing() {
        let sink = Arc::new(SlowSink {
            inner: MemorySink::new(),
        });
        let store = Arc::new(BatchedStore::new(sink.clone(), config(5, 20)));

        let mut tasks = Vec::new();
        for producer in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let batch = (0..(i % 3 + 1))
                        .map(|j| rec(&format!("{producer}-{i}-{j}")))
                        .collect();
                    store.add(batch).await;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            }));
        }
        for t in tasks {
            t.await.expect("producer");
        }
        store.finish().await.expect("finish");

        let mut names: Vec<String> = sink.inner.records().into_iter().map(|r| r.name).collect();
        let expected: usize = 8 * (0..10).map(|i| i % 3 + 1).sum::<usize>();
        assert_eq!(names.len(), expected);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), expected, "a record was written twice");
        assert_eq!(store.stats().records_written, expected);
    }
}
