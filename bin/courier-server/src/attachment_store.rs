//! S3-compatible attachment store (spec §6 "Attachment store")

use async_trait::async_trait;
use courier_backend::attachments::AttachmentStore;
use courier_backend::error::{BackendError, Result};
use courier_backend::models::Channel;
use uuid::Uuid;

pub struct S3AttachmentStore {
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    http_client: reqwest::Client,
}

impl S3AttachmentStore {
    pub fn new(endpoint: String, bucket: String, access_key: String, secret_key: String) -> Self {
        Self {
            endpoint,
            bucket,
            access_key,
            secret_key,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AttachmentStore for S3AttachmentStore {
    async fn save(&self, channel: &Channel, content_type: &str, bytes: &[u8], extension: &str) -> Result<String> {
        let key = format!("{}/{}{}", channel.uuid, Uuid::new_v4(), extension);
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);

        let response = self
            .http_client
            .put(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Vendor(format!("attachment upload failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendError::Vendor(format!(
                "attachment store returned {}",
                response.status()
            )));
        }

        Ok(url)
    }
}
