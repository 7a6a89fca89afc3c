//! Contact/URN resolver (spec §4.F)
//!
//! The only safe primitive is the `(org_id, identity)` unique
//! constraint on `contacts_contacturn`; every conflict restarts the
//! whole procedure from a fresh transaction rather than attempting an
//! application-level lock (spec §5 "Locking discipline").

use chrono::Utc;
use courier_db::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapter::ChannelAdapter;
use crate::error::{BackendError, Result};
use crate::models::{sanitize_contact_name, Channel, ChannelRole, Contact, Urn};
use crate::stats::Stats;

/// Bounded retry limit for the "rollback and restart" loop (spec §9).
const MAX_RESTARTS: u32 = 5;

/// A contact's existing URN as seen by [`classify_priority_case`]:
/// just enough to decide which of cases A/B/C applies, without the
/// row carrying the database handle needed to act on it.
pub(crate) struct UrnRow {
    pub id: i64,
    pub scheme: String,
}

pub(crate) struct PriorityDemotion {
    pub urn_id: i64,
    pub new_priority: i32,
    pub retarget_channel: bool,
}

pub(crate) enum PriorityCase {
    /// Case A: the incoming URN is the contact's only one.
    SoleUrn,
    /// Case B: the incoming URN already has top priority. No writes.
    AlreadyTop,
    /// Case C: the incoming URN is promoted to top priority and every
    /// other URN is demoted one slot, in `rows` order (priority DESC).
    Promote { demotions: Vec<PriorityDemotion> },
}

/// Decides which of spec §4.F's default-URN cases applies, given the
/// contact's URNs ordered by priority descending. Pulled out of
/// `set_default_urn` so the promote/demote bookkeeping is testable
/// without a transaction.
pub(crate) fn classify_priority_case(
    incoming_id: i64,
    incoming_scheme: &str,
    channel_has_send_role: bool,
    rows: &[UrnRow],
) -> PriorityCase {
    if rows.len() == 1 {
        return PriorityCase::SoleUrn;
    }

    let top_id = rows.first().map(|r| r.id).unwrap_or(incoming_id);
    if top_id == incoming_id {
        return PriorityCase::AlreadyTop;
    }

    let mut demoted_priority = Urn::DEFAULT_PRIORITY;
    let mut demotions = Vec::with_capacity(rows.len().saturating_sub(1));
    for row in rows {
        if row.id == incoming_id {
            continue;
        }
        demotions.push(PriorityDemotion {
            urn_id: row.id,
            new_priority: demoted_priority,
            retarget_channel: row.scheme == incoming_scheme && channel_has_send_role,
        });
        demoted_priority -= 1;
    }
    PriorityCase::Promote { demotions }
}

#[derive(Clone)]
pub struct Resolver {
    pool: PgPool,
    stats: Arc<Stats>,
}

impl Resolver {
    pub fn new(pool: PgPool, stats: Arc<Stats>) -> Self {
        Self { pool, stats }
    }

    /// `resolve(org, channel, urn, auth_tokens, incoming_name, allow_create) -> contact`
    pub async fn resolve(
        &self,
        org_id: i64,
        channel: &Channel,
        scheme: &str,
        path: &str,
        auth_tokens: std::collections::HashMap<String, String>,
        incoming_name: Option<String>,
        allow_create: bool,
        adapter: Option<&dyn ChannelAdapter>,
        incoming_display: Option<&str>,
    ) -> Result<Option<Contact>> {
        let identity = Urn::identity_of(scheme, path);

        for _attempt in 0..MAX_RESTARTS {
            let mut conn = self.pool.get().await?;
            let txn = conn
                .transaction()
                .await
                .map_err(|e| BackendError::Transient(e.to_string()))?;

            let existing = self.find_urn(&txn, org_id, &identity).await?;

            if let Some(urn) = existing {
                let contact = self.fetch_contact(&txn, urn.contact_id.unwrap()).await?;
                match self
                    .set_default_urn(&txn, &contact, &urn, channel, &auth_tokens, incoming_display)
                    .await
                {
                    Ok(()) => {
                        txn.commit().await.map_err(|e| BackendError::Transient(e.to_string()))?;
                        return Ok(Some(contact));
                    }
                    Err(BackendError::Conflict(_)) => continue,
                    Err(e) => return Err(e),
                }
            }

            if !allow_create {
                return Ok(None);
            }

            let name = if !channel.org_is_anon && incoming_name.is_none() {
                if let Some(a) = adapter {
                    // `describe_urn` needs a channel log; resolution
                    // runs before the caller has one, so it is given a
                    // scratch log that the caller may discard.
                    let mut scratch = crate::models::ChannelLog {
                        uuid: Uuid::new_v4(),
                        channel_uuid: channel.uuid,
                        log_type: "describe_urn".into(),
                        elapsed: std::time::Duration::ZERO,
                        created_on: Utc::now(),
                        http_exchanges: vec![],
                        errors: vec![],
                        is_error: false,
                    };
                    let placeholder = Urn {
                        id: 0,
                        org_id,
                        identity: identity.clone(),
                        scheme: scheme.to_string(),
                        path: path.to_string(),
                        display: None,
                        auth_tokens: auth_tokens.clone(),
                        priority: Urn::DEFAULT_PRIORITY,
                        channel_id: Some(channel.id),
                        contact_id: None,
                        previous_contact_id: None,
                    };
                    a.describe_urn(channel, &placeholder, &mut scratch).await
                } else {
                    None
                }
            } else {
                incoming_name
            }
            .map(|n| sanitize_contact_name(&n));

            match self
                .create_contact_and_urn(
                    &txn,
                    org_id,
                    &identity,
                    scheme,
                    path,
                    name,
                    channel,
                    &auth_tokens,
                    incoming_display,
                )
                .await
            {
                Ok(mut contact) => {
                    txn.commit().await.map_err(|e| BackendError::Transient(e.to_string()))?;
                    contact.is_new = true;
                    self.stats.contacts_created.inc();
                    return Ok(Some(contact));
                }
                Err(BackendError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BackendError::Conflict(format!(
            "exceeded {MAX_RESTARTS} restarts resolving urn {identity}"
        )))
    }

    async fn find_urn(
        &self,
        txn: &deadpool_postgres::Transaction<'_>,
        org_id: i64,
        identity: &str,
    ) -> Result<Option<Urn>> {
        let row = txn
            .query_opt(
                "SELECT id, org_id, identity, scheme, path, display, auth_tokens, priority, channel_id, contact_id \
                 FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
                &[&org_id, &identity],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        Ok(row.map(|r| Urn {
            id: r.get(0),
            org_id: r.get(1),
            identity: r.get(2),
            scheme: r.get(3),
            path: r.get(4),
            display: r.get(5),
            auth_tokens: r
                .get::<_, Option<serde_json::Value>>(6)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            priority: r.get(7),
            channel_id: r.get(8),
            contact_id: r.get(9),
            previous_contact_id: None,
        }))
    }

    async fn fetch_contact(&self, txn: &deadpool_postgres::Transaction<'_>, contact_id: i64) -> Result<Contact> {
        let row = txn
            .query_one(
                "SELECT id, uuid, org_id, name, created_on, modified_on, created_by_id, modified_by_id \
                 FROM contacts_contact WHERE id = $1",
                &[&contact_id],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        Ok(Contact {
            id: row.get(0),
            uuid: row.get(1),
            org_id: row.get(2),
            name: row.get(3),
            created_on: row.get(4),
            modified_on: row.get(5),
            created_by_id: row.get::<_, Option<i64>>(6).into(),
            modified_by_id: row.get::<_, Option<i64>>(7).into(),
            is_new: false,
        })
    }

    /// Fetches all URNs for the contact ordered by priority and
    /// applies cases A/B/C from spec §4.F via [`classify_priority_case`].
    async fn set_default_urn(
        &self,
        txn: &deadpool_postgres::Transaction<'_>,
        contact: &Contact,
        incoming: &Urn,
        channel: &Channel,
        auth_tokens: &std::collections::HashMap<String, String>,
        incoming_display: Option<&str>,
    ) -> Result<()> {
        let rows = txn
            .query(
                "SELECT id, scheme, priority, channel_id FROM contacts_contacturn \
                 WHERE contact_id = $1 ORDER BY priority DESC",
                &[&contact.id],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let urn_rows: Vec<UrnRow> = rows
            .iter()
            .map(|r| UrnRow {
                id: r.get(0),
                scheme: r.get(1),
            })
            .collect();

        match classify_priority_case(incoming.id, &incoming.scheme, channel.has_role(ChannelRole::Send), &urn_rows) {
            PriorityCase::SoleUrn => {
                // Case A: single URN equal to ours — refresh display / channel / auth tokens.
                let tokens_json = serde_json::to_value(auth_tokens).unwrap_or_default();
                txn.execute(
                    "UPDATE contacts_contacturn SET channel_id = $2, auth_tokens = $3, \
                     display = coalesce($4, display) WHERE id = $1",
                    &[&incoming.id, &channel.id, &tokens_json, &incoming_display],
                )
                .await
                .map_err(|e| BackendError::Transient(e.to_string()))?;
            }
            PriorityCase::AlreadyTop => {
                // Case B: ours is already at top. No writes.
            }
            PriorityCase::Promote { demotions } => {
                // Case C: promote ours, demote the rest.
                txn.execute(
                    "UPDATE contacts_contacturn SET priority = $2 WHERE id = $1",
                    &[&incoming.id, &Urn::TOP_PRIORITY],
                )
                .await
                .map_err(|e| BackendError::Transient(e.to_string()))?;

                for demotion in demotions {
                    txn.execute(
                        "UPDATE contacts_contacturn SET priority = $2 WHERE id = $1",
                        &[&demotion.urn_id, &demotion.new_priority],
                    )
                    .await
                    .map_err(|e| BackendError::Transient(e.to_string()))?;

                    if demotion.retarget_channel {
                        txn.execute(
                            "UPDATE contacts_contacturn SET channel_id = $2 WHERE id = $1",
                            &[&demotion.urn_id, &channel.id],
                        )
                        .await
                        .map_err(|e| BackendError::Transient(e.to_string()))?;
                    }
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_contact_and_urn(
        &self,
        txn: &deadpool_postgres::Transaction<'_>,
        org_id: i64,
        identity: &str,
        scheme: &str,
        path: &str,
        name: Option<String>,
        channel: &Channel,
        auth_tokens: &std::collections::HashMap<String, String>,
        display: Option<&str>,
    ) -> Result<Contact> {
        let now = Utc::now();
        let uuid = Uuid::new_v4();

        let row = txn
            .query_one(
                "INSERT INTO contacts_contact (uuid, org_id, name, created_on, modified_on, created_by_id, modified_by_id, is_active) \
                 VALUES ($1, $2, $3, $4, $4, 0, 0, true) RETURNING id",
                &[&uuid, &org_id, &name, &now],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let contact_id: i64 = row.get(0);

        let tokens_json = serde_json::to_value(auth_tokens).unwrap_or_default();
        let insert = txn
            .query_opt(
                "INSERT INTO contacts_contacturn (org_id, identity, scheme, path, display, auth_tokens, priority, channel_id, contact_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (org_id, identity) DO NOTHING \
                 RETURNING id",
                &[
                    &org_id,
                    &identity,
                    &scheme,
                    &path,
                    &display,
                    &tokens_json,
                    &Urn::DEFAULT_PRIORITY,
                    &channel.id,
                    &contact_id,
                ],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if insert.is_none() {
            // Another writer inserted the same URN first: conflict,
            // restart from step 1 per spec §4.F step 4.
            return Err(BackendError::Conflict(format!("urn {identity} already exists")));
        }

        // Did the existing (but just-raced) row belong to someone else?
        let owner_row = txn
            .query_one(
                "SELECT contact_id FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
                &[&org_id, &identity],
            )
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let owner_id: i64 = owner_row.get(0);
        if owner_id != contact_id {
            return Err(BackendError::Conflict(format!(
                "urn {identity} owned by a different contact, yielding"
            )));
        }

        Ok(Contact {
            id: contact_id,
            uuid,
            org_id,
            name,
            created_on: now,
            modified_on: now,
            created_by_id: courier_core::NullId::NULL,
            modified_by_id: courier_core::NullId::NULL,
            is_new: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, scheme: &str) -> UrnRow {
        UrnRow {
            id,
            scheme: scheme.to_string(),
        }
    }

    #[test]
    fn sole_urn_is_case_a() {
        let rows = vec![row(1, "tel")];
        assert!(matches!(
            classify_priority_case(1, "tel", true, &rows),
            PriorityCase::SoleUrn
        ));
    }

    #[test]
    fn incoming_already_top_is_case_b() {
        let rows = vec![row(7, "tel"), row(3, "twitter")];
        assert!(matches!(
            classify_priority_case(7, "tel", true, &rows),
            PriorityCase::AlreadyTop
        ));
    }

    /// Scenario C — a URN steal: the incoming URN is not the
    /// contact's top one, so it is promoted and every other URN
    /// demoted in place, matching-scheme ones retargeted to the
    /// inbound channel only if that channel can send.
    #[test]
    fn scenario_c_promotes_incoming_and_demotes_rest() {
        let rows = vec![row(3, "twitter"), row(9, "tel"), row(7, "tel")];
        match classify_priority_case(7, "tel", true, &rows) {
            PriorityCase::Promote { demotions } => {
                assert_eq!(demotions.len(), 2);
                assert_eq!(demotions[0].urn_id, 3);
                assert_eq!(demotions[0].new_priority, Urn::DEFAULT_PRIORITY);
                assert!(!demotions[0].retarget_channel);

                assert_eq!(demotions[1].urn_id, 9);
                assert_eq!(demotions[1].new_priority, Urn::DEFAULT_PRIORITY - 1);
                assert!(demotions[1].retarget_channel);
            }
            _ => panic!("expected Promote case"),
        }
    }

    #[test]
    fn same_scheme_demotion_not_retargeted_without_send_role() {
        let rows = vec![row(9, "tel"), row(7, "tel")];
        match classify_priority_case(7, "tel", false, &rows) {
            PriorityCase::Promote { demotions } => {
                assert_eq!(demotions.len(), 1);
                assert!(!demotions[0].retarget_channel);
            }
            _ => panic!("expected Promote case"),
        }
    }
}
