//! Dedup store (spec §4.C): a time-bounded fingerprint -> UUID map in
//! the KV store, kept for 5 minutes (the exact window is not
//! configurable upstream per spec §9; 5 minutes is the observed value).

use sha1::{Digest, Sha1};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::kv::KvClient;

pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// `{channel-uuid}|{urn-identity}|{external-id}` when an external id is
/// present; otherwise `{channel-uuid}|{urn-identity}` (spec §4.G).
pub fn fingerprint_key(channel_uuid: Uuid, urn_identity: &str, external_id: Option<&str>) -> String {
    match external_id {
        Some(ext) if !ext.is_empty() => format!("{channel_uuid}|{urn_identity}|{ext}"),
        _ => format!("{channel_uuid}|{urn_identity}"),
    }
}

/// `{UUID}|{sha1(text|attachments)}`, used as the stored value when no
/// external id is present so a content change still counts as a new
/// delivery even under a collapsed key.
pub fn content_signature(msg_uuid: Uuid, text: &str, attachments: &[String]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(attachments.join(",").as_bytes());
    let digest = hasher.finalize();
    format!("{msg_uuid}|{digest:x}")
}

pub struct DedupStore<'a> {
    kv: &'a KvClient,
}

impl<'a> DedupStore<'a> {
    pub fn new(kv: &'a KvClient) -> Self {
        Self { kv }
    }

    /// Returns the previously-recorded msg UUID, if the fingerprint
    /// matches a still-live record and (when present) the stored
    /// content signature agrees.
    pub async fn lookup(
        &self,
        channel_uuid: Uuid,
        urn_identity: &str,
        external_id: Option<&str>,
        text: &str,
        attachments: &[String],
    ) -> Result<Option<Uuid>> {
        let key = fingerprint_key(channel_uuid, urn_identity, external_id);
        let Some(stored) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        if external_id.is_some() {
            return Ok(Uuid::parse_str(&stored).ok());
        }

        // Stored as `{uuid}|{sha1}`; a duplicate only counts if the
        // content signature also matches.
        let Some((uuid_part, sig_part)) = stored.split_once('|') else {
            return Ok(None);
        };
        let expected = content_signature(Uuid::parse_str(uuid_part).unwrap_or_default(), text, attachments);
        if expected == stored {
            Ok(Uuid::parse_str(uuid_part).ok())
        } else {
            let _ = sig_part;
            Ok(None)
        }
    }

    pub async fn record(
        &self,
        channel_uuid: Uuid,
        urn_identity: &str,
        external_id: Option<&str>,
        msg_uuid: Uuid,
        text: &str,
        attachments: &[String],
    ) -> Result<()> {
        let key = fingerprint_key(channel_uuid, urn_identity, external_id);
        let value = if external_id.is_some() {
            msg_uuid.to_string()
        } else {
            content_signature(msg_uuid, text, attachments)
        };
        self.kv.set_ex(&key, &value, DEDUP_WINDOW).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_external_id_when_present() {
        let ch = Uuid::nil();
        let key = fingerprint_key(ch, "tel:+1", Some("ext7"));
        assert_eq!(key, format!("{ch}|tel:+1|ext7"));
    }

    #[test]
    fn key_omits_external_id_when_absent() {
        let ch = Uuid::nil();
        let key = fingerprint_key(ch, "tel:+1", None);
        assert_eq!(key, format!("{ch}|tel:+1"));
    }

    #[test]
    fn content_signature_changes_with_text() {
        let uuid = Uuid::new_v4();
        let a = content_signature(uuid, "hello", &[]);
        let b = content_signature(uuid, "world", &[]);
        assert_ne!(a, b);
    }
}
