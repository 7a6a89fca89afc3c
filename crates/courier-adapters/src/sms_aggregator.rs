//! Generic HTTP SMS aggregator adapter
//!
//! Many SMS vendors expose the same shape of API: a single POST with
//! a bearer token, a `to`/`text` body, and a vendor message id in the
//! response. This adapter covers that family rather than one vendor.

use async_trait::async_trait;
use courier_backend::adapter::ChannelAdapter;
use courier_backend::error::{BackendError, Result};
use courier_backend::models::{Channel, ChannelLog, HttpExchange, LogError, Msg, MsgStatus};
use serde_json::json;
use std::time::Instant;

pub struct SmsAggregatorAdapter {
    base_url: String,
    access_token: String,
    http_client: reqwest::Client,
}

impl SmsAggregatorAdapter {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            base_url,
            access_token,
            http_client: reqwest::Client::new(),
        }
    }

    fn to_vendor_format(&self, msg: &Msg, to: &str) -> serde_json::Value {
        json!({
            "to": to,
            "text": msg.text,
            "media": msg.attachments,
        })
    }
}

#[async_trait]
impl ChannelAdapter for SmsAggregatorAdapter {
    fn channel_type(&self) -> &'static str {
        "SA"
    }

    async fn send(&self, msg: &Msg, clog: &mut ChannelLog) -> Result<MsgStatus> {
        // The adapter knows the contact's URN path from the caller's
        // context in a real deployment; here it stands in with the
        // contact id the way the core's own fixtures do.
        let to = msg.contact_id.to_string();
        let payload = self.to_vendor_format(msg, &to);
        let url = format!("{}/messages", self.base_url);

        let started = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Vendor(e.to_string()))?;

        let status_code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        clog.http_exchanges.push(HttpExchange {
            url,
            method: "POST".into(),
            status_code,
            request: payload.to_string(),
            response: body.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        match status_code {
            200..=299 => Ok(MsgStatus::Wired),
            429 | 503 => {
                // Rate-limit signal (spec §7): recorded as an errored
                // send here; the status writer sets the channel's KV
                // rate-limit flag once this lands as an `errored`
                // status update, ahead of the next retry.
                clog.is_error = true;
                clog.errors.push(LogError {
                    message: "rate limited by vendor".into(),
                    code: Some(status_code.to_string()),
                });
                Ok(MsgStatus::Errored)
            }
            _ => {
                clog.is_error = true;
                clog.errors.push(LogError {
                    message: body,
                    code: Some(status_code.to_string()),
                });
                Ok(MsgStatus::Errored)
            }
        }
    }

    fn redact_values(&self, _channel: &Channel) -> Vec<String> {
        vec![self.access_token.clone()]
    }
}
