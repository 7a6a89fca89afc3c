//! Attachment store (spec §6, used by the inbound write path §4.G)

use async_trait::async_trait;
use base64::Engine;

use crate::error::{BackendError, Result};
use crate::models::Channel;

/// External collaborator: `save(channel, content_type, bytes, extension) -> url`.
#[async_trait]
pub trait AttachmentStore: Send + Sync + 'static {
    async fn save(&self, channel: &Channel, content_type: &str, bytes: &[u8], extension: &str) -> Result<String>;
}

/// Decodes a `data:` URI, sniffs its content type from the first 300
/// bytes (falling back to `application/octet-stream`/`.bin`), and
/// persists it via `store`. Returns `{content-type}:{url}` to replace
/// the original URI (spec §4.G step 2).
pub async fn rewrite_data_uri(store: &dyn AttachmentStore, channel: &Channel, uri: &str) -> Result<String> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(uri.to_string());
    };
    let Some((meta, b64)) = rest.split_once(',') else {
        return Err(BackendError::Validation(format!("malformed data uri: {uri}")));
    };
    let declared_type = meta.split(';').next().unwrap_or("").to_string();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| BackendError::Validation(format!("invalid base64 in data uri: {e}")))?;

    let sniff_window = &bytes[..bytes.len().min(300)];
    let (content_type, extension) = match infer::get(sniff_window) {
        Some(kind) => (kind.mime_type().to_string(), format!(".{}", kind.extension())),
        None if !declared_type.is_empty() => (declared_type, ".bin".to_string()),
        None => ("application/octet-stream".to_string(), ".bin".to_string()),
    };

    let url = store.save(channel, &content_type, &bytes, &extension).await?;
    Ok(format!("{content_type}:{url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigMap;
    use uuid::Uuid;

    struct MemStore;

    #[async_trait]
    impl AttachmentStore for MemStore {
        async fn save(&self, _channel: &Channel, content_type: &str, bytes: &[u8], _extension: &str) -> Result<String> {
            Ok(format!("mem://{}/{}", content_type, bytes.len()))
        }
    }

    fn channel() -> Channel {
        Channel {
            id: 1,
            uuid: Uuid::new_v4(),
            channel_type: "KN".into(),
            org_id: 1,
            name: "t".into(),
            address: "2020".into(),
            country: "RW".into(),
            schemes: vec!["tel".into()],
            roles: vec![],
            config: ConfigMap::default(),
            org_config: ConfigMap::default(),
            org_is_anon: false,
            log_policy: crate::models::LogPolicy::All,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn non_data_uri_passes_through() {
        let store = MemStore;
        let out = rewrite_data_uri(&store, &channel(), "https://example.com/x.png").await.unwrap();
        assert_eq!(out, "https://example.com/x.png");
    }

    #[tokio::test]
    async fn data_uri_decodes_and_rewrites() {
        let store = MemStore;
        let payload = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        let uri = format!("data:text/plain;base64,{payload}");
        let out = rewrite_data_uri(&store, &channel(), &uri).await.unwrap();
        assert!(out.starts_with("application/octet-stream:mem://") || out.contains("mem://"));
    }

    #[tokio::test]
    async fn malformed_data_uri_is_rejected() {
        let store = MemStore;
        let err = rewrite_data_uri(&store, &channel(), "data:text/plain;base64").await;
        assert!(err.is_err());
    }
}
