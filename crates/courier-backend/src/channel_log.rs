//! Channel log writer (spec §4.I)
//!
//! Gzips HTTP exchanges and errors into a blob, then enqueues onto a
//! wide-column store through the generic batcher at 1000/500ms/1000.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::batcher::{BatchSink, Batcher, BatcherConfig};
use crate::models::{Channel, ChannelLog, LogPolicy};

/// A wide-column item ready to write to the `Main` table (spec §6).
#[derive(Debug, Clone)]
pub struct WideColumnItem {
    pub partition_key: String,
    pub sort_key: String,
    pub org_id: i64,
    pub ttl: Option<i64>,
    pub data: serde_json::Value,
    pub data_gz: Option<Vec<u8>>,
}

const SEVEN_DAYS_SECS: i64 = 7 * 24 * 60 * 60;

fn gzip(payload: &serde_json::Value) -> Vec<u8> {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(&bytes);
    encoder.finish().unwrap_or_default()
}

/// A backend-agnostic "write a batch of items" sink; the real courier
/// server wires this to its wide-column client, tests wire it to an
/// in-memory `Vec`.
#[async_trait]
pub trait WideColumnStore: Send + Sync + 'static {
    async fn batch_write(&self, items: Vec<WideColumnItem>) -> Vec<WideColumnItem>;
}

struct StoreSink<S: WideColumnStore> {
    store: Arc<S>,
}

#[async_trait]
impl<S: WideColumnStore> BatchSink<WideColumnItem> for StoreSink<S> {
    async fn write(&self, items: Vec<WideColumnItem>) {
        // Retry is not implemented for channel telemetry (spec §4.I):
        // unprocessed items from the store's batch endpoint are logged
        // and dropped.
        let unprocessed = self.store.batch_write(items).await;
        if !unprocessed.is_empty() {
            warn!(count = unprocessed.len(), "channel log items dropped by wide-column store");
        }
    }
}

pub struct ChannelLogWriter {
    batcher: Batcher<WideColumnItem>,
}

impl ChannelLogWriter {
    pub fn start<S: WideColumnStore>(store: Arc<S>) -> Self {
        let sink = Arc::new(StoreSink { store });
        let batcher = Batcher::start(BatcherConfig::new(1000, 1000, Duration::from_millis(500)), sink);
        Self { batcher }
    }

    /// Applies the per-channel log policy and, if kept, enqueues the
    /// log. Returns `false` without enqueuing when the policy or
    /// back-pressure drops the record (telemetry is lossy, spec §5).
    pub fn write(&self, channel: &Channel, log: ChannelLog) -> bool {
        let keep = match channel.log_policy {
            LogPolicy::None => false,
            LogPolicy::Errors => log.is_error,
            LogPolicy::All => true,
        };
        if !keep {
            return false;
        }

        let gz = gzip(&serde_json::json!({
            "http_exchanges": log.http_exchanges,
            "errors": log.errors,
        }));

        let item = WideColumnItem {
            partition_key: log.partition_key(),
            sort_key: log.sort_key(),
            org_id: channel.org_id,
            ttl: Some(chrono::Utc::now().timestamp() + SEVEN_DAYS_SECS),
            data: serde_json::json!({
                "uuid": log.uuid,
                "channel_uuid": log.channel_uuid,
                "type": log.log_type,
                "elapsed_ms": log.elapsed.as_millis(),
                "created_on": log.created_on,
                "is_error": log.is_error,
            }),
            data_gz: Some(gz),
        };

        self.batcher.queue(item) > 0
    }

    pub async fn shutdown(self) {
        self.batcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigMap};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MemStore {
        written: Mutex<Vec<WideColumnItem>>,
    }

    #[async_trait]
    impl WideColumnStore for MemStore {
        async fn batch_write(&self, items: Vec<WideColumnItem>) -> Vec<WideColumnItem> {
            self.written.lock().unwrap().extend(items);
            vec![]
        }
    }

    fn channel(policy: LogPolicy) -> Channel {
        Channel {
            id: 1,
            uuid: Uuid::new_v4(),
            channel_type: "KN".into(),
            org_id: 7,
            name: "test".into(),
            address: "2020".into(),
            country: "RW".into(),
            schemes: vec!["tel".into()],
            roles: vec![],
            config: ConfigMap::default(),
            org_config: ConfigMap::default(),
            org_is_anon: false,
            log_policy: policy,
            is_active: true,
        }
    }

    fn sample_log(is_error: bool) -> ChannelLog {
        ChannelLog {
            uuid: Uuid::new_v4(),
            channel_uuid: Uuid::new_v4(),
            log_type: "webhook".into(),
            elapsed: Duration::from_millis(5),
            created_on: chrono::Utc::now(),
            http_exchanges: vec![],
            errors: vec![],
            is_error,
        }
    }

    #[tokio::test]
    async fn none_policy_drops_everything() {
        let store = Arc::new(MemStore { written: Mutex::new(vec![]) });
        let writer = ChannelLogWriter::start(store.clone());
        assert!(!writer.write(&channel(LogPolicy::None), sample_log(true)));
        writer.shutdown().await;
        assert!(store.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn errors_policy_keeps_only_errors() {
        let store = Arc::new(MemStore { written: Mutex::new(vec![]) });
        let writer = ChannelLogWriter::start(store.clone());
        assert!(!writer.write(&channel(LogPolicy::Errors), sample_log(false)));
        assert!(writer.write(&channel(LogPolicy::Errors), sample_log(true)));
        writer.shutdown().await;
        assert_eq!(store.written.lock().unwrap().len(), 1);
    }
}
