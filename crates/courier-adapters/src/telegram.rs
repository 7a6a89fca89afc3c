//! Telegram Bot API adapter

use async_trait::async_trait;
use courier_backend::adapter::ChannelAdapter;
use courier_backend::error::{BackendError, Result};
use courier_backend::models::{ChannelLog, HttpExchange, Msg, MsgStatus};
use serde_json::json;
use std::time::Instant;

pub struct TelegramAdapter {
    bot_token: String,
    http_client: reqwest::Client,
}

impl TelegramAdapter {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            http_client: reqwest::Client::new(),
        }
    }

    fn to_platform_format(&self, msg: &Msg) -> serde_json::Value {
        let mut payload = json!({ "chat_id": msg.contact_id, "text": msg.text });
        if !msg.attachments.is_empty() {
            payload["caption"] = json!(msg.text);
            payload["photo"] = json!(msg.attachments[0]);
        }
        if !msg.quick_replies.is_empty() {
            let keyboard: Vec<Vec<serde_json::Value>> = msg
                .quick_replies
                .iter()
                .map(|r| vec![json!({ "text": r })])
                .collect();
            payload["reply_markup"] = json!({ "keyboard": keyboard, "one_time_keyboard": true });
        }
        payload
    }

    fn method_for(&self, msg: &Msg) -> &'static str {
        if msg.attachments.is_empty() {
            "sendMessage"
        } else {
            "sendPhoto"
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn channel_type(&self) -> &'static str {
        "TG"
    }

    async fn send(&self, msg: &Msg, clog: &mut ChannelLog) -> Result<MsgStatus> {
        let method = self.method_for(msg);
        let payload = self.to_platform_format(msg);
        let url = format!("https://api.telegram.org/bot{}/{}", self.bot_token, method);

        let started = Instant::now();
        let response = self
            .http_client
            .post(&url)
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

        if (200..300).contains(&status_code) {
            Ok(MsgStatus::Wired)
        } else {
            clog.is_error = true;
            clog.errors.push(courier_backend::models::LogError {
                message: body,
                code: Some(status_code.to_string()),
            });
            Ok(MsgStatus::Errored)
        }
    }

    fn redact_values(&self, _channel: &courier_backend::models::Channel) -> Vec<String> {
        vec![self.bot_token.clone()]
    }
}
