//! Persistent and transient record types (spec §3)

use chrono::{DateTime, Utc};
use courier_core::NullId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Mapping string -> any, with typed accessors (spec §9 "dynamic config
/// values"). JSON numbers arriving as floating point are coerced to
/// integer for `int_for`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigMap(pub HashMap<String, serde_json::Value>);

impl ConfigMap {
    pub fn string_for(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn int_for(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    pub fn bool_for(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// Per-channel log retention policy (spec §3, §4.I)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogPolicy {
    None,
    Errors,
    All,
}

/// Channel roles (spec §3: receive, send, call, answer, usside)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    Receive,
    Send,
    Call,
    Answer,
    UssdSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub uuid: Uuid,
    pub channel_type: String,
    pub org_id: i64,
    pub name: String,
    pub address: String,
    pub country: String,
    pub schemes: Vec<String>,
    pub roles: Vec<ChannelRole>,
    pub config: ConfigMap,
    pub org_config: ConfigMap,
    pub org_is_anon: bool,
    pub log_policy: LogPolicy,
    pub is_active: bool,
}

impl Channel {
    pub fn has_role(&self, role: ChannelRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s == scheme)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub uuid: Uuid,
    pub org_id: i64,
    pub name: Option<String>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub created_by_id: NullId,
    pub modified_by_id: NullId,
    /// Transient: set when `resolve` just inserted this contact.
    #[serde(skip)]
    pub is_new: bool,
}

/// Clamp a contact display name to 128 Unicode code points and drop
/// invalid UTF-8 sequences, per spec §3.
pub fn sanitize_contact_name(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| *c != '\u{0}').collect();
    cleaned.chars().take(128).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Urn {
    pub id: i64,
    pub org_id: i64,
    pub identity: String,
    pub scheme: String,
    pub path: String,
    pub display: Option<String>,
    pub auth_tokens: HashMap<String, String>,
    pub priority: i32,
    pub channel_id: Option<i64>,
    pub contact_id: Option<i64>,
    /// Transient: set when a transfer moved this URN from another contact.
    #[serde(skip)]
    pub previous_contact_id: Option<i64>,
}

impl Urn {
    pub fn identity_of(scheme: &str, path: &str) -> String {
        format!("{scheme}:{path}")
    }

    pub const DEFAULT_PRIORITY: i32 = 50;
    pub const TOP_PRIORITY: i32 = 99;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgStatus {
    Pending,
    Queued,
    Wired,
    Sent,
    Delivered,
    Failed,
    Errored,
}

impl MsgStatus {
    /// True for the forward chain pending->queued->wired->sent->delivered.
    pub fn is_terminal(self) -> bool {
        matches!(self, MsgStatus::Delivered | MsgStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    pub id: i64,
    pub uuid: Uuid,
    pub org_id: i64,
    pub direction: Direction,
    pub status: MsgStatus,
    pub visibility: Visibility,
    pub text: String,
    pub attachments: Vec<String>,
    pub quick_replies: Vec<String>,
    pub locale: Option<String>,
    pub external_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub channel_id: i64,
    pub contact_id: i64,
    pub urn_id: i64,
    pub attempts: i32,
    pub error_count: i32,
    pub failed_reason: Option<char>,
    pub next_attempt: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub queued_on: Option<DateTime<Utc>>,
    pub sent_on: Option<DateTime<Utc>>,
    pub log_uuids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEventType {
    NewConversation,
    Referral,
    StopContact,
    Welcome,
    OptIn,
    OptOut,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub id: i64,
    pub uuid: Uuid,
    pub org_id: i64,
    pub event_type: ChannelEventType,
    pub extra: HashMap<String, serde_json::Value>,
    pub channel_id: i64,
    pub contact_id: i64,
    pub urn_id: i64,
    pub occurred_on: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub log_uuids: Vec<Uuid>,
}

/// A transient record resolved to a concrete message during batch write
/// (spec §3, §4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub channel_uuid: Uuid,
    pub channel_id: i64,
    pub msg_id: Option<i64>,
    pub external_id: Option<String>,
    pub old_urn: Option<String>,
    pub new_urn: Option<String>,
    pub status: MsgStatus,
    pub modified_on: DateTime<Utc>,
    pub log_uuid: Uuid,
}

impl StatusUpdate {
    /// Either `msg_id` or `external_id` is required (spec §3).
    pub fn is_well_formed(&self) -> bool {
        self.msg_id.is_some() || self.external_id.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// URN migration is valid only for identical schemes and distinct,
    /// non-nil paths (spec §8 property 5).
    pub fn validate_urn_migration(&self) -> Result<(), crate::BackendError> {
        match (&self.old_urn, &self.new_urn) {
            (None, None) => Ok(()),
            (Some(old), Some(new)) => {
                let old_scheme = old.split(':').next().unwrap_or("");
                let new_scheme = new.split(':').next().unwrap_or("");
                if old_scheme != new_scheme {
                    return Err(crate::BackendError::Validation(
                        "urn migration requires identical schemes".into(),
                    ));
                }
                if old == new {
                    return Err(crate::BackendError::Validation(
                        "urn migration requires distinct paths".into(),
                    ));
                }
                Ok(())
            }
            _ => Err(crate::BackendError::Validation(
                "urn migration requires both old and new urn".into(),
            )),
        }
    }
}

/// An HTTP exchange recorded by an adapter, redacted before logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExchange {
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub request: String,
    pub response: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogError {
    pub message: String,
    pub code: Option<String>,
}

/// Written to the wide-column store with a 7-day TTL (spec §3, §4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLog {
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub log_type: String,
    pub elapsed: std::time::Duration,
    pub created_on: DateTime<Utc>,
    pub http_exchanges: Vec<HttpExchange>,
    pub errors: Vec<LogError>,
    pub is_error: bool,
}

impl ChannelLog {
    /// `cha#{channel-uuid}#{last hex char of log UUID}`: 16 buckets
    /// per channel (spec §4.I, §3).
    pub fn partition_key(&self) -> String {
        let log_hex = self.uuid.simple().to_string();
        let last = log_hex.chars().last().unwrap_or('0');
        format!("cha#{}#{}", self.channel_uuid, last)
    }

    pub fn sort_key(&self) -> String {
        format!("log#{}", self.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_map_coerces_float_to_int() {
        let mut m = HashMap::new();
        m.insert("retries".to_string(), serde_json::json!(3.0));
        let cfg = ConfigMap(m);
        assert_eq!(cfg.int_for("retries", 0), 3);
        assert_eq!(cfg.int_for("missing", 7), 7);
    }

    #[test]
    fn sanitize_truncates_to_128_code_points() {
        let long: String = "x".repeat(200);
        assert_eq!(sanitize_contact_name(&long).chars().count(), 128);
    }

    #[test]
    fn status_update_requires_id_or_external_id() {
        let su = StatusUpdate {
            channel_uuid: Uuid::nil(),
            channel_id: 1,
            msg_id: None,
            external_id: None,
            old_urn: None,
            new_urn: None,
            status: MsgStatus::Sent,
            modified_on: Utc::now(),
            log_uuid: Uuid::nil(),
        };
        assert!(!su.is_well_formed());
    }

    #[test]
    fn urn_migration_rejects_mismatched_scheme() {
        let su = StatusUpdate {
            channel_uuid: Uuid::nil(),
            channel_id: 1,
            msg_id: Some(1),
            external_id: None,
            old_urn: Some("tel:+1".to_string()),
            new_urn: Some("whatsapp:+1".to_string()),
            status: MsgStatus::Sent,
            modified_on: Utc::now(),
            log_uuid: Uuid::nil(),
        };
        assert!(su.validate_urn_migration().is_err());
    }

    #[test]
    fn urn_migration_rejects_identical_path() {
        let su = StatusUpdate {
            channel_uuid: Uuid::nil(),
            channel_id: 1,
            msg_id: Some(1),
            external_id: None,
            old_urn: Some("tel:+1".to_string()),
            new_urn: Some("tel:+1".to_string()),
            status: MsgStatus::Sent,
            modified_on: Utc::now(),
            log_uuid: Uuid::nil(),
        };
        assert!(su.validate_urn_migration().is_err());
    }

    #[test]
    fn channel_log_partition_key_has_16_buckets() {
        let log = ChannelLog {
            uuid: Uuid::nil(),
            channel_uuid: Uuid::nil(),
            log_type: "webhook".into(),
            elapsed: std::time::Duration::from_millis(10),
            created_on: Utc::now(),
            http_exchanges: vec![],
            errors: vec![],
            is_error: false,
        };
        assert!(log.partition_key().starts_with("cha#"));
        assert!(log.sort_key().starts_with("log#"));
    }
}
