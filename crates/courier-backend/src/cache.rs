//! Process-local channel cache (spec §4.E)
//!
//! Guarded by a read-write lock per spec §5; writes happen only on
//! miss or invalidation. `dashmap` gives us that without a single
//! global lock serialising unrelated channels.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::Channel;

const TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    NotFound,
    WrongType,
    /// Cache hit but stale; carries the stale value so the caller can
    /// fall back to it if the database is unavailable.
    Expired(Arc<Channel>),
}

struct Entry {
    channel: Arc<Channel>,
    loaded_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.loaded_at.elapsed() >= TTL
    }
}

/// A process-wide expiring lookup keyed by channel UUID and, for
/// non-empty addresses, by `(type, address)` too. Lifted into a
/// construction-time object per spec §9 rather than module statics,
/// so the backend can own one instance and hand it out by reference.
#[derive(Default)]
pub struct ChannelCache {
    by_uuid: DashMap<Uuid, Entry>,
    by_address: DashMap<(String, String), Uuid>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh hit returns immediately. An expired hit is returned
    /// alongside `Expired`; wrong-type hits never touch the database.
    pub fn get(&self, channel_type: &str, uuid: Uuid) -> Result<Arc<Channel>, CacheError> {
        let entry = self.by_uuid.get(&uuid).ok_or(CacheError::NotFound)?;
        if channel_type != "any-type" && entry.channel.channel_type != channel_type {
            return Err(CacheError::WrongType);
        }
        if entry.is_expired() {
            return Err(CacheError::Expired(entry.channel.clone()));
        }
        Ok(entry.channel.clone())
    }

    /// Same semantics as [`get`](Self::get), keyed by address.
    pub fn get_by_address(&self, channel_type: &str, address: &str) -> Result<Arc<Channel>, CacheError> {
        let uuid = *self
            .by_address
            .get(&(channel_type.to_string(), address.to_string()))
            .ok_or(CacheError::NotFound)?;
        self.get(channel_type, uuid)
    }

    /// Resolved "open question" from spec §9: cache the address index
    /// only when the address is non-empty, not only when it is empty.
    pub fn put(&self, channel: Channel) {
        let channel = Arc::new(channel);
        if !channel.address.is_empty() {
            self.by_address.insert(
                (channel.channel_type.clone(), channel.address.clone()),
                channel.uuid,
            );
        }
        self.by_uuid.insert(
            channel.uuid,
            Entry {
                channel,
                loaded_at: Instant::now(),
            },
        );
    }

    /// Evict on lookup miss, e.g. after the database reports `not-found`
    /// for an expired entry.
    pub fn invalidate_uuid(&self, uuid: Uuid) {
        if let Some((_, entry)) = self.by_uuid.remove(&uuid) {
            self.by_address
                .retain(|_, v| *v != entry.channel.uuid);
        }
    }

    pub fn invalidate_address(&self, channel_type: &str, address: &str) {
        self.by_address
            .remove(&(channel_type.to_string(), address.to_string()));
    }

    #[cfg(test)]
    pub(crate) fn put_aged(&self, channel: Channel, age: Duration) {
        let channel = Arc::new(channel);
        self.by_uuid.insert(
            channel.uuid,
            Entry {
                channel,
                loaded_at: Instant::now().checked_sub(age).expect("age underflows Instant"),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigMap, LogPolicy};

    fn sample_channel(uuid: Uuid, address: &str) -> Channel {
        Channel {
            id: 101,
            uuid,
            channel_type: "KN".into(),
            org_id: 1,
            name: "test".into(),
            address: address.into(),
            country: "RW".into(),
            schemes: vec!["tel".into()],
            roles: vec![],
            config: ConfigMap::default(),
            org_config: ConfigMap::default(),
            org_is_anon: false,
            log_policy: LogPolicy::All,
            is_active: true,
        }
    }

    #[test]
    fn fresh_hit_returns_immediately() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid, "2020"));
        assert!(cache.get("KN", uuid).is_ok());
        assert!(cache.get_by_address("KN", "2020").is_ok());
    }

    #[test]
    fn wrong_type_is_error_without_db_lookup() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid, "2020"));
        assert_eq!(cache.get("EX", uuid), Err(CacheError::WrongType));
    }

    #[test]
    fn any_type_wildcard_matches() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid, "2020"));
        assert!(cache.get("any-type", uuid).is_ok());
    }

    #[test]
    fn empty_address_is_never_indexed() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid, ""));
        assert_eq!(cache.get_by_address("KN", ""), Err(CacheError::NotFound));
    }

    #[test]
    fn expired_hit_carries_stale_value() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put_aged(sample_channel(uuid, "2020"), Duration::from_secs(61));
        match cache.get("KN", uuid) {
            Err(CacheError::Expired(stale)) => assert_eq!(stale.uuid, uuid),
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn invalidate_evicts_both_indexes() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid, "2020"));
        cache.invalidate_uuid(uuid);
        assert_eq!(cache.get("KN", uuid), Err(CacheError::NotFound));
        assert_eq!(cache.get_by_address("KN", "2020"), Err(CacheError::NotFound));
    }
}
