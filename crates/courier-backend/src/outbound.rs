//! Outbound status path (spec §4.H)

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use courier_db::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::batcher::{BatchSink, Batcher, BatcherConfig};
use crate::error::{BackendError, Result};
use crate::kv::KvClient;
use crate::models::{MsgStatus, StatusUpdate};
use crate::spool::{Spool, SpoolKind};
use crate::stats::Stats;

/// `write_status(update) -> err`: pushed through the batcher, drained
/// in batches of up to 1000 every 500ms (spec §4.D sizing for §4.H).
pub struct OutboundWriter {
    batcher: Batcher<StatusUpdate>,
}

struct StatusSink {
    pool: PgPool,
    spool: Arc<Spool>,
    stats: Arc<Stats>,
    kv: KvClient,
}

#[async_trait]
impl BatchSink<StatusUpdate> for StatusSink {
    async fn write(&self, items: Vec<StatusUpdate>) {
        let resolved = match self.resolve_external_ids(items).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to resolve external ids for status batch");
                return;
            }
        };

        if let Err(e) = self.apply_batch(&resolved).await {
            warn!(error = %e, "bulk status update failed, retrying one at a time");
            for update in resolved {
                if let Err(e) = self.apply_one(&update).await {
                    error!(error = %e, "status update failed after retry, spooling");
                    self.spool_one(&update);
                }
            }
        }
    }
}

impl StatusSink {
    /// Updates carrying only an external id are resolved to a msg id
    /// via bulk SELECT. Unresolved updates are dropped from the batch
    /// (not an error; the message may not exist yet) and counted.
    async fn resolve_external_ids(&self, items: Vec<StatusUpdate>) -> Result<Vec<StatusUpdate>> {
        let (with_id, needs_resolution): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|u| u.msg_id.is_some());

        if needs_resolution.is_empty() {
            return Ok(with_id);
        }

        let conn = self.pool.get().await?;
        let mut resolved = with_id;
        for mut update in needs_resolution {
            let external_id = update.external_id.clone().unwrap_or_default();
            let row = conn
                .query_opt(
                    "SELECT id FROM msgs_msg WHERE channel_id = $1 AND external_id = $2",
                    &[&update.channel_id, &external_id],
                )
                .await
                .map_err(|e| BackendError::Transient(e.to_string()))?;

            match row {
                Some(r) => {
                    update.msg_id = Some(r.get(0));
                    resolved.push(update);
                }
                None => {
                    self.stats.statuses_unresolved.inc();
                    warn!(external_id, channel_id = update.channel_id, "status update unresolved");
                }
            }
        }
        Ok(resolved)
    }

    async fn apply_batch(&self, updates: &[StatusUpdate]) -> Result<()> {
        let conn = self.pool.get().await?;
        for update in updates {
            self.apply_with_conn(&conn, update).await?;
        }
        Ok(())
    }

    async fn apply_one(&self, update: &StatusUpdate) -> Result<()> {
        let conn = self.pool.get().await?;
        self.apply_with_conn(&conn, update).await
    }

    /// Encodes the status state machine from spec §4.H as a single
    /// statement per message (`sqlUpdateMsgByID`).
    async fn apply_with_conn(&self, conn: &deadpool_postgres::Object, update: &StatusUpdate) -> Result<()> {
        self.migrate_urn(conn, update).await?;

        let msg_id = update.msg_id.ok_or_else(|| BackendError::Validation("msg_id required".into()))?;

        let row = conn
            .query_opt("SELECT status, error_count FROM msgs_msg WHERE id = $1", &[&msg_id])
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?
            .ok_or_else(|| BackendError::NotFound(format!("msg {msg_id} not found")))?;
        let prior_status: String = row.get(0);
        let prior_error_count: i32 = row.get(1);

        let transition = next_transition(&prior_status, prior_error_count, update.status);

        let status_code = status_code(transition.status).to_string();
        let external_id = update.external_id.as_ref().filter(|s| !s.is_empty());

        conn.execute(
            "UPDATE msgs_msg SET \
                status = $2, \
                error_count = $3, \
                next_attempt = $4, \
                failed_reason = $5, \
                sent_on = CASE WHEN $6 THEN coalesce(sent_on, now()) ELSE sent_on END, \
                external_id = coalesce($7, external_id), \
                log_uuids = array_append(log_uuids, $8), \
                modified_on = now() \
             WHERE id = $1 AND direction = 'O'",
            &[
                &msg_id,
                &status_code,
                &transition.error_count,
                &transition.next_attempt,
                &transition.failed_reason.map(|c| c.to_string()),
                &transition.set_sent_on,
                &external_id,
                &update.log_uuid,
            ],
        )
        .await
        .map_err(|e| BackendError::Transient(e.to_string()))?;

        if let (MsgStatus::Errored, Some(next_attempt)) = (transition.status, transition.next_attempt) {
            self.flag_rate_limit(update.channel_uuid, next_attempt).await;
        }

        Ok(())
    }

    /// Best-effort: marks the channel rate-limited until its next retry
    /// is due, so the (external) dispatcher backs off the whole channel
    /// instead of hammering a vendor that just errored (spec §7). A KV
    /// failure here must not fail the status write itself.
    async fn flag_rate_limit(&self, channel_uuid: uuid::Uuid, next_attempt: chrono::DateTime<Utc>) {
        let ttl = rate_limit_ttl_for(next_attempt, Utc::now());
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.kv.set_rate_limited(channel_uuid, ttl).await {
            warn!(error = %e, %channel_uuid, "failed to set channel rate-limit flag");
        }
    }

    /// Moves `old_urn` to `new_urn`'s identity/path in place (spec
    /// §4.H, §4.F step 5): the same `contacts_contacturn` row keeps
    /// its contact, priority and channel, only its identity changes.
    /// No-op when the update carries no migration.
    async fn migrate_urn(&self, conn: &deadpool_postgres::Object, update: &StatusUpdate) -> Result<()> {
        let (Some(old_urn), Some(new_urn)) = (&update.old_urn, &update.new_urn) else {
            return Ok(());
        };

        let new_path = urn_path(new_urn);

        let updated = conn
            .execute(
                "UPDATE contacts_contacturn SET identity = $3, path = $4 \
                 WHERE identity = $2 \
                 AND org_id = (SELECT org_id FROM channels_channel WHERE id = $1)",
                &[&update.channel_id, old_urn, new_urn, &new_path],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if updated == 0 {
            warn!(old_urn, new_urn, "urn migration found no matching urn to move");
        }

        Ok(())
    }

    fn spool_one(&self, update: &StatusUpdate) {
        match serde_json::to_vec(update) {
            Ok(bytes) => {
                if let Err(e) = self.spool.write(SpoolKind::Statuses, &bytes) {
                    error!(error = %e, "failed to spool status update");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize status update for spool"),
        }
    }
}

struct Transition {
    status: MsgStatus,
    error_count: i32,
    next_attempt: Option<chrono::DateTime<Utc>>,
    failed_reason: Option<char>,
    set_sent_on: bool,
}

/// Pure decision step of the §4.H state machine, kept separate from
/// `apply_with_conn` so the error-count/failed-promotion logic can be
/// exercised without a database.
fn next_transition(prior_status: &str, prior_error_count: i32, new_status: MsgStatus) -> Transition {
    match new_status {
        MsgStatus::Wired | MsgStatus::Sent | MsgStatus::Delivered => Transition {
            status: new_status,
            error_count: prior_error_count,
            next_attempt: None,
            failed_reason: None,
            set_sent_on: true,
        },
        MsgStatus::Errored => {
            // threshold is checked against the count *before* this
            // increment: the third errored update is the one that
            // flips status to failed, not the second.
            let new_count = prior_error_count + 1;
            if prior_status == "F" || prior_error_count >= 2 {
                Transition {
                    status: MsgStatus::Failed,
                    error_count: new_count,
                    next_attempt: None,
                    failed_reason: Some('E'),
                    set_sent_on: false,
                }
            } else {
                let next = Utc::now() + ChronoDuration::minutes(5 * new_count as i64);
                Transition {
                    status: MsgStatus::Errored,
                    error_count: new_count,
                    next_attempt: Some(next),
                    failed_reason: None,
                    set_sent_on: false,
                }
            }
        }
        other => Transition {
            status: other,
            error_count: prior_error_count,
            next_attempt: None,
            failed_reason: None,
            set_sent_on: false,
        },
    }
}

/// The path half of a `scheme:path` identity string. Split once so a
/// path that itself contains a colon (e.g. a `tel:` URN with an
/// extension) is not truncated.
fn urn_path(identity: &str) -> &str {
    identity.split_once(':').map(|(_, path)| path).unwrap_or("")
}

/// Clamps a retry-at timestamp that may already be in the past (a
/// slow batch catching up) down to a zero TTL instead of erroring.
fn rate_limit_ttl_for(next_attempt: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> Duration {
    (next_attempt - now).to_std().unwrap_or(Duration::ZERO)
}

fn status_code(status: MsgStatus) -> char {
    match status {
        MsgStatus::Pending => 'P',
        MsgStatus::Queued => 'Q',
        MsgStatus::Wired => 'W',
        MsgStatus::Sent => 'S',
        MsgStatus::Delivered => 'D',
        MsgStatus::Errored => 'E',
        MsgStatus::Failed => 'F',
    }
}

impl OutboundWriter {
    pub fn start(pool: PgPool, spool: Arc<Spool>, stats: Arc<Stats>, kv: KvClient) -> Self {
        let sink = Arc::new(StatusSink { pool, spool, stats, kv });
        let batcher = Batcher::start(BatcherConfig::new(1000, 1000, Duration::from_millis(500)), sink);
        Self { batcher }
    }

    pub fn write_status(&self, update: StatusUpdate) -> Result<()> {
        update.validate_urn_migration()?;
        if !update.is_well_formed() {
            return Err(BackendError::Validation(
                "status update requires msg id or external id".into(),
            ));
        }
        self.batcher.queue(update);
        Ok(())
    }

    pub async fn shutdown(self) {
        self.batcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urn_path_splits_on_first_colon_only() {
        assert_eq!(urn_path("tel:+12065551234"), "+12065551234");
        assert_eq!(urn_path("tel:+1:ext9"), "+1:ext9");
        assert_eq!(urn_path("no-colon"), "");
    }

    #[test]
    fn rate_limit_ttl_tracks_the_retry_delay() {
        let now = Utc::now();
        let ttl = rate_limit_ttl_for(now + ChronoDuration::minutes(10), now);
        assert_eq!(ttl.as_secs(), 600);
    }

    #[test]
    fn rate_limit_ttl_clamps_past_timestamps_to_zero() {
        let now = Utc::now();
        let ttl = rate_limit_ttl_for(now - ChronoDuration::minutes(1), now);
        assert_eq!(ttl, Duration::ZERO);
    }

    #[test]
    fn status_code_maps_each_variant() {
        assert_eq!(status_code(MsgStatus::Delivered), 'D');
        assert_eq!(status_code(MsgStatus::Failed), 'F');
    }

    /// Scenario D — send msg 500, then three `errored` updates in a row.
    #[test]
    fn scenario_d_errored_progression_to_failed() {
        let first = next_transition("W", 0, MsgStatus::Errored);
        assert_eq!(first.status, MsgStatus::Errored);
        assert_eq!(first.error_count, 1);
        assert!(first.next_attempt.is_some());

        let second = next_transition("E", 1, MsgStatus::Errored);
        assert_eq!(second.status, MsgStatus::Errored);
        assert_eq!(second.error_count, 2);
        let first_delay = first.next_attempt.unwrap() - Utc::now();
        let second_delay = second.next_attempt.unwrap() - Utc::now();
        assert!(second_delay > first_delay);

        let third = next_transition("E", 2, MsgStatus::Errored);
        assert_eq!(third.status, MsgStatus::Failed);
        assert_eq!(third.failed_reason, Some('E'));
        assert_eq!(third.error_count, 3);
    }

    /// Property 4 — once a message is `failed`, further `errored`
    /// updates keep it `failed` rather than resetting the progression.
    #[test]
    fn status_monotonicity_failed_is_sticky() {
        let after_failed = next_transition("F", 3, MsgStatus::Errored);
        assert_eq!(after_failed.status, MsgStatus::Failed);
        assert_eq!(after_failed.failed_reason, Some('E'));
    }

    /// Property 4 — `delivered` always sets `sent_on`.
    #[test]
    fn status_monotonicity_delivered_sets_sent_on() {
        let t = next_transition("S", 0, MsgStatus::Delivered);
        assert!(t.set_sent_on);
        assert_eq!(t.status, MsgStatus::Delivered);
    }
}
