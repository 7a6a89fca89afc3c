//! Identifier codec (spec component A) and request-scoped context
//!
//! `NullId`/`NullString` mirror the database convention used by this
//! kind of system: a `bigserial` primary key is never legitimately 0,
//! so 0 (resp. the empty string) doubles as the "unset" sentinel. That
//! lets an optional foreign key round-trip through JSON as `null` and
//! through a Postgres column as `NULL` without wrapping every accessor
//! in `Option`. Postgres (de)serialisation glue lives in `courier-db`,
//! which owns the `tokio_postgres` dependency.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// A nullable 64-bit integer id. Zero is the null sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NullId(pub i64);

impl NullId {
    pub const NULL: NullId = NullId(0);

    pub fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn get(&self) -> Option<i64> {
        if self.is_null() {
            None
        } else {
            Some(self.0)
        }
    }
}

impl From<i64> for NullId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<Option<i64>> for NullId {
    fn from(v: Option<i64>) -> Self {
        Self(v.unwrap_or(0))
    }
}

impl fmt::Display for NullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "null"),
        }
    }
}

impl Serialize for NullId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.get() {
            Some(v) => s.serialize_i64(v),
            None => s.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for NullId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let opt: Option<i64> = Option::deserialize(d)?;
        Ok(NullId::from(opt))
    }
}

/// A nullable string id/token. The empty string is the null sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NullString(pub String);

impl NullString {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self) -> Option<&str> {
        if self.is_null() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl From<Option<String>> for NullString {
    fn from(v: Option<String>) -> Self {
        Self(v.unwrap_or_default())
    }
}

impl Serialize for NullString {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self.get() {
            Some(v) => s.serialize_str(v),
            None => s.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for NullString {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        Ok(NullString::from(opt))
    }
}

/// A `(UUID, integer id)` pair, the identity shape shared by Channel,
/// Contact, and Message in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DualId {
    pub id: i64,
    pub uuid: Uuid,
}

impl DualId {
    pub fn generate(id: i64) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for DualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.uuid)
    }
}

/// A request-scoped deadline carrier, propagated through every call
/// that crosses an I/O boundary (spec §5). HTTP handlers set 30s,
/// flushers 10s, batch drains 60s.
#[derive(Debug, Clone)]
pub struct Deadline {
    pub trace_id: String,
    pub expires_at: std::time::Instant,
}

impl Deadline {
    pub fn after(duration: std::time::Duration) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            expires_at: std::time::Instant::now() + duration,
        }
    }

    pub fn http() -> Self {
        Self::after(std::time::Duration::from_secs(30))
    }

    pub fn flusher() -> Self {
        Self::after(std::time::Duration::from_secs(10))
    }

    pub fn batch_drain() -> Self {
        Self::after(std::time::Duration::from_secs(60))
    }

    pub fn is_expired(&self) -> bool {
        std::time::Instant::now() >= self.expires_at
    }

    pub fn remaining(&self) -> std::time::Duration {
        self.expires_at
            .saturating_duration_since(std::time::Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_round_trips_through_json() {
        let present = NullId::new(42);
        let absent = NullId::NULL;
        assert_eq!(serde_json::to_string(&present).unwrap(), "42");
        assert_eq!(serde_json::to_string(&absent).unwrap(), "null");

        let back: NullId = serde_json::from_str("42").unwrap();
        assert_eq!(back, present);
        let back: NullId = serde_json::from_str("null").unwrap();
        assert_eq!(back, absent);
    }

    #[test]
    fn null_string_empty_is_null() {
        let s = NullString::new("");
        assert!(s.is_null());
        assert_eq!(s.get(), None);
        let s = NullString::new("tel:+123");
        assert_eq!(s.get(), Some("tel:+123"));
    }

    #[test]
    fn deadline_expires() {
        let d = Deadline::after(std::time::Duration::from_millis(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(d.is_expired());
    }
}
