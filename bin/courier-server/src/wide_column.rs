//! Wide-column store client (spec §6 "Wide-column store")
//!
//! A minimal HTTP-fronted client against a DynamoDB-style `Main` table.
//! Unprocessed items are returned to the caller, which logs them; the
//! channel log writer never retries them (spec §4.I).

use async_trait::async_trait;
use courier_backend::channel_log::{WideColumnItem, WideColumnStore};
use tracing::warn;

pub struct HttpWideColumnStore {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpWideColumnStore {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WideColumnStore for HttpWideColumnStore {
    async fn batch_write(&self, items: Vec<WideColumnItem>) -> Vec<WideColumnItem> {
        if self.endpoint.is_empty() {
            return items;
        }

        let batch: Vec<_> = items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "pk": item.partition_key,
                    "sk": item.sort_key,
                    "org_id": item.org_id,
                    "ttl": item.ttl,
                    "data": item.data,
                    "data_gz": item.data_gz.as_ref().map(|b| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
                })
            })
            .collect();

        let response = self
            .http_client
            .post(format!("{}/Main/batch-write", self.endpoint))
            .json(&batch)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => Vec::new(),
            Ok(r) => {
                warn!(status = %r.status(), "wide-column batch-write rejected, items dropped");
                items
            }
            Err(e) => {
                warn!(error = %e, "wide-column batch-write failed, items dropped");
                items
            }
        }
    }
}
