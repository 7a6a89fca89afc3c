//! Generic batcher (spec §4.D)
//!
//! A bounded queue that drains in groups of `N` or after `T` to a sink
//! function, running in a dedicated worker task. Used by the channel
//! log writer (§4.I) and the outbound status path (§4.H), both at
//! 1000/500ms/1000 capacity.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

#[async_trait]
pub trait BatchSink<T>: Send + Sync + 'static {
    /// Delivers a batch. Must be idempotent under a partially applied
    /// bulk: the caller only knows the batch as a whole succeeded or
    /// failed.
    async fn write(&self, items: Vec<T>);
}

#[async_trait]
impl<T, F, Fut> BatchSink<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn write(&self, items: Vec<T>) {
        (self)(items).await;
    }
}

pub struct BatcherConfig {
    pub capacity: usize,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl BatcherConfig {
    pub fn new(capacity: usize, max_batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            capacity,
            max_batch_size,
            flush_interval,
        }
    }
}

/// Handle returned to callers; `queue` never blocks. When the queue is
/// full it returns `<= 0` and the caller chooses to drop or spool
/// (spec §5 "inbound writes never drop").
///
/// Shutdown uses a pair of one-shot channels rather than `Notify`:
/// `Notify::notify_waiters` only wakes *already-registered* waiters,
/// so a `shutdown()` call made before the spawned task is first
/// polled would be silently lost and the barrier would hang forever.
/// A one-shot `send` buffers its value regardless of whether the
/// receiver has been polled yet, so the signal is never lost.
pub struct Batcher<T: Send + 'static> {
    tx: mpsc::Sender<T>,
    capacity: usize,
    shutdown: oneshot::Sender<()>,
    drained: oneshot::Receiver<()>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn start(config: BatcherConfig, sink: Arc<dyn BatchSink<T>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<T>(config.capacity);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (drained_tx, drained_rx) = oneshot::channel();
        let capacity = config.capacity;

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(config.max_batch_size);
            let mut interval = tokio::time::interval(config.flush_interval);
            let mut shutting_down = false;

            loop {
                tokio::select! {
                    maybe_item = rx.recv(), if !shutting_down => {
                        match maybe_item {
                            Some(item) => {
                                batch.push(item);
                                if batch.len() >= config.max_batch_size {
                                    sink.write(std::mem::take(&mut batch)).await;
                                }
                            }
                            None => shutting_down = true,
                        }
                    }
                    _ = interval.tick() => {
                        if !batch.is_empty() {
                            sink.write(std::mem::take(&mut batch)).await;
                        }
                    }
                    _ = &mut shutdown_rx, if !shutting_down => {
                        rx.close();
                        shutting_down = true;
                    }
                }

                if shutting_down && rx.is_empty() {
                    break;
                }
            }

            // Drain whatever arrived between `close()` and the final
            // recv returning `None`, then flush the last partial batch.
            while let Ok(item) = rx.try_recv() {
                batch.push(item);
            }
            if !batch.is_empty() {
                sink.write(batch).await;
            }
            let _ = drained_tx.send(());
        });

        Self {
            tx,
            capacity,
            shutdown: shutdown_tx,
            drained: drained_rx,
        }
    }

    /// Returns the approximate remaining capacity after enqueuing.
    /// `<= 0` means the caller must drop or spool the item itself.
    pub fn queue(&self, item: T) -> i64 {
        match self.tx.try_send(item) {
            Ok(()) => self.tx.capacity() as i64,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("batcher at capacity, caller must drop or spool");
                0
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("batcher is shut down, item dropped");
                0
            }
        }
    }

    /// Barrier: flushes all pending items before returning.
    pub async fn shutdown(self) {
        // The receiver may already be gone if the worker task exited
        // on its own; either way the barrier below still completes.
        let _ = self.shutdown.send(());
        let _ = self.drained.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BatchSink<u32> for CountingSink {
        async fn write(&self, items: Vec<u32>) {
            self.count.fetch_add(items.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn drains_by_size() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink { count: count.clone() });
        let batcher = Batcher::start(
            BatcherConfig::new(100, 5, Duration::from_secs(10)),
            sink,
        );
        for i in 0..5u32 {
            batcher.queue(i);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_remainder_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink { count: count.clone() });
        let batcher = Batcher::start(
            BatcherConfig::new(100, 1000, Duration::from_secs(10)),
            sink,
        );
        for i in 0..7u32 {
            batcher.queue(i);
        }
        batcher.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn full_queue_reports_no_capacity() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink { count: count.clone() });
        let batcher = Batcher::start(
            BatcherConfig::new(1, 1000, Duration::from_secs(10)),
            sink,
        );
        let _ = batcher.queue(1);
        let remaining = batcher.queue(2);
        assert!(remaining <= 0);
        batcher.shutdown().await;
    }
}
