//! Inbound write path (spec §4.G)

use chrono::Utc;
use courier_db::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::adapter::ChannelAdapter;
use crate::attachments::{rewrite_data_uri, AttachmentStore};
use crate::dedup::DedupStore;
use crate::enqueue::{TaskEnqueuer, TaskPayload};
use crate::error::{BackendError, Result};
use crate::kv::KvClient;
use crate::models::Channel;
use crate::resolver::Resolver;
use crate::spool::{Spool, SpoolKind};
use crate::stats::Stats;

/// Pre-persistence shape a caller (the channel adapter) builds from
/// the vendor's webhook payload.
#[derive(Debug, Clone)]
pub struct InboundMsg {
    pub channel: Arc<Channel>,
    pub scheme: String,
    pub path: String,
    pub text: String,
    pub attachments: Vec<String>,
    pub external_id: Option<String>,
    pub received_on: chrono::DateTime<Utc>,
    pub contact_name: Option<String>,
    pub auth_tokens: HashMap<String, String>,
    /// Vendor-reported display name for this URN (e.g. a profile name),
    /// distinct from `contact_name` which seeds the contact record.
    pub urn_display: Option<String>,
}

pub struct InboundWriter {
    pool: PgPool,
    kv: KvClient,
    resolver: Resolver,
    spool: Arc<Spool>,
    stats: Arc<Stats>,
}

impl InboundWriter {
    pub fn new(pool: PgPool, kv: KvClient, resolver: Resolver, spool: Arc<Spool>, stats: Arc<Stats>) -> Self {
        Self {
            pool,
            kv,
            resolver,
            spool,
            stats,
        }
    }

    /// `write_msg(msg) -> err`. See spec §4.G for the exact step order.
    pub async fn write_msg(
        &self,
        mut inbound: InboundMsg,
        attachment_store: &dyn AttachmentStore,
        adapter: Option<&dyn ChannelAdapter>,
    ) -> Result<Uuid> {
        let identity = crate::models::Urn::identity_of(&inbound.scheme, &inbound.path);
        let dedup = DedupStore::new(&self.kv);

        // Step 1: dedup check first.
        if let Some(existing_uuid) = dedup
            .lookup(
                inbound.channel.uuid,
                &identity,
                inbound.external_id.as_deref(),
                &inbound.text,
                &inbound.attachments,
            )
            .await?
        {
            return Ok(existing_uuid);
        }

        // Step 2: decode data: URI attachments.
        let mut rewritten = Vec::with_capacity(inbound.attachments.len());
        for uri in &inbound.attachments {
            rewritten.push(rewrite_data_uri(attachment_store, &inbound.channel, uri).await?);
        }
        inbound.attachments = rewritten;

        let msg_uuid = Uuid::new_v4();

        match self.persist(&inbound, &identity, msg_uuid, adapter).await {
            Ok((msg_id, contact_id, urn_id)) => {
                // Step 5: enqueue is best-effort; failures are logged,
                // never propagated (msg is already durable).
                let enqueuer = TaskEnqueuer::new(&self.kv);
                if let Err(e) = enqueuer
                    .enqueue(inbound.channel.org_id, contact_id, TaskPayload::HandleMsgEvent { msg_uuid })
                    .await
                {
                    warn!(error = %e, msg_id, "failed to enqueue inbound message task");
                }

                // Step 6: record the dedup fingerprint.
                dedup
                    .record(
                        inbound.channel.uuid,
                        &identity,
                        inbound.external_id.as_deref(),
                        msg_uuid,
                        &inbound.text,
                        &inbound.attachments,
                    )
                    .await?;

                self.stats.msgs_received.inc();
                let _ = urn_id;
                Ok(msg_uuid)
            }
            Err(e) if matches!(e, BackendError::Transient(_)) => {
                error!(error = %e, "inbound write failed, spooling");
                let spooled = SpooledMsg {
                    uuid: msg_uuid,
                    channel_uuid: inbound.channel.uuid,
                    scheme: inbound.scheme.clone(),
                    path: inbound.path.clone(),
                    text: inbound.text.clone(),
                    attachments: inbound.attachments.clone(),
                    external_id: inbound.external_id.clone(),
                    received_on: inbound.received_on,
                    contact_name: inbound.contact_name.clone(),
                    auth_tokens: inbound.auth_tokens.clone(),
                    urn_display: inbound.urn_display.clone(),
                };
                let payload = serde_json::to_vec(&spooled)
                    .map_err(|e| BackendError::Validation(e.to_string()))?;
                // The adapter's ack is only suppressed if this also fails.
                self.spool.write(SpoolKind::Msgs, &payload)?;
                self.stats.msgs_spooled.inc();
                Ok(msg_uuid)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(
        &self,
        inbound: &InboundMsg,
        identity: &str,
        msg_uuid: Uuid,
        adapter: Option<&dyn ChannelAdapter>,
    ) -> Result<(i64, i64, i64)> {
        // Step 3: resolve contact (allow_create = true).
        let contact = self
            .resolver
            .resolve(
                inbound.channel.org_id,
                &inbound.channel,
                &inbound.scheme,
                &inbound.path,
                inbound.auth_tokens.clone(),
                inbound.contact_name.clone(),
                true,
                adapter,
                inbound.urn_display.as_deref(),
            )
            .await?
            .ok_or_else(|| BackendError::Validation("resolver declined to create contact".into()))?;

        let mut conn = self.pool.get().await?;
        let urn_row = conn
            .query_one(
                "SELECT id FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
                &[&inbound.channel.org_id, &identity],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let urn_id: i64 = urn_row.get(0);

        // Step 4: insert the msg row.
        let now = Utc::now();
        let row = conn
            .query_one(
                "INSERT INTO msgs_msg (uuid, org_id, direction, status, visibility, text, attachments, \
                 external_id, channel_id, contact_id, contact_urn_id, created_on, modified_on, queued_on) \
                 VALUES ($1, $2, 'I', 'P', 'V', $3, $4, $5, $6, $7, $8, $9, $9, $9) RETURNING id",
                &[
                    &msg_uuid,
                    &inbound.channel.org_id,
                    &inbound.text,
                    &inbound.attachments,
                    &inbound.external_id,
                    &inbound.channel.id,
                    &contact.id,
                    &urn_id,
                    &now,
                ],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let msg_id: i64 = row.get(0);

        Ok((msg_id, contact.id, urn_id))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SpooledMsg {
    uuid: Uuid,
    channel_uuid: Uuid,
    scheme: String,
    path: String,
    text: String,
    attachments: Vec<String>,
    external_id: Option<String>,
    received_on: chrono::DateTime<Utc>,
    contact_name: Option<String>,
    auth_tokens: HashMap<String, String>,
    urn_display: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spooled_msg_round_trips_through_json() {
        let spooled = SpooledMsg {
            uuid: Uuid::new_v4(),
            channel_uuid: Uuid::new_v4(),
            scheme: "tel".into(),
            path: "+12067799192".into(),
            text: "hello".into(),
            attachments: vec![],
            external_id: Some("ext7".into()),
            received_on: Utc::now(),
            contact_name: None,
            auth_tokens: HashMap::new(),
            urn_display: None,
        };
        let json = serde_json::to_vec(&spooled).unwrap();
        let back: SpooledMsg = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.uuid, spooled.uuid);
        assert_eq!(back.external_id, spooled.external_id);
    }
}
