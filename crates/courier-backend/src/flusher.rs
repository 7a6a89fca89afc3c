//! Spool flusher registry (spec §4.L)
//!
//! Periodic directory scan + per-kind reinjection. Each kind gets a
//! callback that attempts to persist the spooled payload; the
//! callback's outcome governs whether the flusher deletes, marks
//! errored, or stops the pass (spec §4.B).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::spool::{replay, ReplayOutcome, Spool, SpoolKind};

type Callback = Arc<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = ReplayOutcome> + Send>> + Send + Sync>;

struct Registration {
    kind: SpoolKind,
    callback: Callback,
}

/// Registers one reinjection callback per spool kind and ticks them
/// periodically (spec: "every few seconds").
pub struct FlusherRegistry {
    spool: Arc<Spool>,
    registrations: Vec<Registration>,
    interval: Duration,
}

impl FlusherRegistry {
    pub fn new(spool: Arc<Spool>) -> Self {
        Self {
            spool,
            registrations: Vec::new(),
            interval: Duration::from_secs(5),
        }
    }

    pub fn register<F, Fut>(&mut self, kind: SpoolKind, callback: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ReplayOutcome> + Send + 'static,
    {
        self.registrations.push(Registration {
            kind,
            callback: Arc::new(move |bytes| Box::pin(callback(bytes))),
        });
    }

    /// Spawns the periodic scan loop; returns a handle the caller can
    /// abort on shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                for reg in &self.registrations {
                    let callback = reg.callback.clone();
                    let outcome = replay(&self.spool, reg.kind, move |_path, bytes| {
                        let callback = callback.clone();
                        async move { callback(bytes).await }
                    })
                    .await;
                    if let Err(e) = outcome {
                        error!(error = %e, "spool flusher pass failed");
                    }
                }
            }
        })
    }
}

pub fn log_flusher_start(kind: &str) {
    info!(kind, "spool flusher registered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registered_callback_drains_spooled_file() {
        let dir = std::env::temp_dir().join(format!("courier-flusher-test-{}", std::process::id()));
        let spool = Arc::new(Spool::open(&dir).unwrap());
        spool.write(SpoolKind::Events, b"{}").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut registry = FlusherRegistry::new(spool.clone());
        registry.register(SpoolKind::Events, move |_bytes| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { ReplayOutcome::Success }
        });

        let handle = registry.start();
        tokio::time::sleep(Duration::from_millis(5200)).await;
        handle.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(spool.list(SpoolKind::Events).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
