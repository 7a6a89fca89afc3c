//! Channel resolver & cache (spec §1 component 1, §4.E algorithm)
//!
//! [`cache::ChannelCache`] only implements the in-memory half of the
//! contract; this module adds the database fallback the algorithm
//! paragraph in spec §4.E describes: an expired hit still goes to the
//! database, a `not-found` database response evicts the entry, and a
//! database error on an expired entry returns the stale value instead
//! of failing the caller.

use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{CacheError, ChannelCache};
use crate::error::{BackendError, Result};
use crate::models::{Channel, ChannelRole, ConfigMap, LogPolicy};

/// Outcome of a single database lookup, independent of how it was
/// performed — lets the orchestration below be tested without Postgres.
pub(crate) enum FetchOutcome {
    Found(Channel),
    NotFound,
    Failed,
}

/// Runs the §4.E algorithm against a cache and an injected fetch step.
/// Kept free of any I/O type so it can be driven by a fake fetch
/// closure in tests.
pub(crate) async fn resolve<F, Fut>(
    cache: &ChannelCache,
    channel_type: &str,
    uuid: Uuid,
    fetch: F,
) -> Result<Arc<Channel>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    match cache.get(channel_type, uuid) {
        Ok(channel) => return Ok(channel),
        Err(CacheError::WrongType) => {
            return Err(BackendError::Validation(format!(
                "channel {uuid} is not of type {channel_type}"
            )))
        }
        Err(CacheError::NotFound) => {}
        Err(CacheError::Expired(stale)) => {
            return match fetch().await {
                FetchOutcome::Found(channel) => {
                    cache.put(channel.clone());
                    Ok(Arc::new(channel))
                }
                FetchOutcome::NotFound => {
                    cache.invalidate_uuid(uuid);
                    Err(BackendError::NotFound(format!("channel {uuid} not found")))
                }
                // Availability over freshness under dependency failure.
                FetchOutcome::Failed => Ok(stale),
            };
        }
    }

    match fetch().await {
        FetchOutcome::Found(channel) => {
            cache.put(channel.clone());
            Ok(Arc::new(channel))
        }
        FetchOutcome::NotFound => Err(BackendError::NotFound(format!("channel {uuid} not found"))),
        FetchOutcome::Failed => Err(BackendError::Transient(format!("channel {uuid} lookup failed"))),
    }
}

/// Address-keyed sibling of [`resolve`]: same availability-over-
/// freshness contract, just evicting/looking up by address instead
/// of uuid since that is the only key callers have before a channel
/// is known.
async fn resolve_by_address<F, Fut>(
    cache: &ChannelCache,
    channel_type: &str,
    address: &str,
    fetch: F,
) -> Result<Arc<Channel>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchOutcome>,
{
    match cache.get_by_address(channel_type, address) {
        Ok(channel) => return Ok(channel),
        Err(CacheError::WrongType) => {
            return Err(BackendError::Validation(format!(
                "channel at address {address} is not of type {channel_type}"
            )))
        }
        Err(CacheError::NotFound) => {}
        Err(CacheError::Expired(stale)) => {
            return match fetch().await {
                FetchOutcome::Found(channel) => {
                    cache.put(channel.clone());
                    Ok(Arc::new(channel))
                }
                FetchOutcome::NotFound => {
                    cache.invalidate_address(channel_type, address);
                    Err(BackendError::NotFound(format!("channel at {address} not found")))
                }
                // Availability over freshness under dependency failure.
                FetchOutcome::Failed => Ok(stale),
            };
        }
    }

    match fetch().await {
        FetchOutcome::Found(channel) => {
            cache.put(channel.clone());
            Ok(Arc::new(channel))
        }
        FetchOutcome::NotFound => Err(BackendError::NotFound(format!("channel at {address} not found"))),
        FetchOutcome::Failed => Err(BackendError::Transient(format!(
            "channel lookup by address {address} failed"
        ))),
    }
}

pub struct ChannelResolver {
    pool: courier_db::PgPool,
    cache: Arc<ChannelCache>,
}

impl ChannelResolver {
    pub fn new(pool: courier_db::PgPool, cache: Arc<ChannelCache>) -> Self {
        Self { pool, cache }
    }

    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    pub async fn get(&self, channel_type: &str, uuid: Uuid) -> Result<Arc<Channel>> {
        let pool = &self.pool;
        resolve(&self.cache, channel_type, uuid, || fetch_by_uuid(pool, uuid)).await
    }

    pub async fn get_by_address(&self, channel_type: &str, address: &str) -> Result<Arc<Channel>> {
        let pool = &self.pool;
        resolve_by_address(&self.cache, channel_type, address, || {
            fetch_by_address(pool, channel_type, address)
        })
        .await
    }
}

async fn fetch_by_uuid(pool: &courier_db::PgPool, uuid: Uuid) -> FetchOutcome {
    let conn = match pool.get().await {
        Ok(c) => c,
        Err(_) => return FetchOutcome::Failed,
    };
    let row = conn
        .query_opt(
            "SELECT id, uuid, channel_type, org_id, name, address, country, schemes, roles, \
             config, org_config, org_is_anon, log_policy, is_active \
             FROM channels_channel WHERE uuid = $1",
            &[&uuid],
        )
        .await;

    match row {
        Ok(Some(r)) => FetchOutcome::Found(channel_from_row(&r)),
        Ok(None) => FetchOutcome::NotFound,
        Err(_) => FetchOutcome::Failed,
    }
}

async fn fetch_by_address(pool: &courier_db::PgPool, channel_type: &str, address: &str) -> FetchOutcome {
    let conn = match pool.get().await {
        Ok(c) => c,
        Err(_) => return FetchOutcome::Failed,
    };
    let row = conn
        .query_opt(
            "SELECT id, uuid, channel_type, org_id, name, address, country, schemes, roles, \
             config, org_config, org_is_anon, log_policy, is_active \
             FROM channels_channel WHERE channel_type = $1 AND address = $2",
            &[&channel_type, &address],
        )
        .await;

    match row {
        Ok(Some(r)) => FetchOutcome::Found(channel_from_row(&r)),
        Ok(None) => FetchOutcome::NotFound,
        Err(_) => FetchOutcome::Failed,
    }
}

fn channel_from_row(row: &tokio_postgres::Row) -> Channel {
    let roles: Vec<String> = row.get(8);
    let log_policy: String = row.get(12);

    Channel {
        id: row.get(0),
        uuid: row.get(1),
        channel_type: row.get(2),
        org_id: row.get(3),
        name: row.get(4),
        address: row.get(5),
        country: row.get(6),
        schemes: row.get(7),
        roles: roles.iter().filter_map(|r| role_from_code(r)).collect(),
        config: row
            .get::<_, Option<serde_json::Value>>(9)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(ConfigMap::default),
        org_config: row
            .get::<_, Option<serde_json::Value>>(10)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(ConfigMap::default),
        org_is_anon: row.get(11),
        log_policy: log_policy_from_code(&log_policy),
        is_active: row.get(13),
    }
}

fn role_from_code(code: &str) -> Option<ChannelRole> {
    match code {
        "R" => Some(ChannelRole::Receive),
        "S" => Some(ChannelRole::Send),
        "C" => Some(ChannelRole::Call),
        "A" => Some(ChannelRole::Answer),
        "U" => Some(ChannelRole::UssdSide),
        _ => None,
    }
}

fn log_policy_from_code(code: &str) -> LogPolicy {
    match code {
        "E" => LogPolicy::Errors,
        "A" => LogPolicy::All,
        _ => LogPolicy::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigMap;

    fn sample_channel(uuid: Uuid) -> Channel {
        Channel {
            id: 101,
            uuid,
            channel_type: "KN".into(),
            org_id: 1,
            name: "test".into(),
            address: "2020".into(),
            country: "RW".into(),
            schemes: vec!["tel".into()],
            roles: vec![ChannelRole::Send],
            config: ConfigMap::default(),
            org_config: ConfigMap::default(),
            org_is_anon: false,
            log_policy: LogPolicy::All,
            is_active: true,
        }
    }

    /// Property 6 — expired entry, database unavailable: stale value wins.
    #[tokio::test]
    async fn expired_entry_survives_database_failure() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put_aged(sample_channel(uuid), std::time::Duration::from_secs(61));

        let result = resolve(&cache, "KN", uuid, || async { FetchOutcome::Failed }).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().uuid, uuid);
    }

    /// Property 6 — expired entry, database reports not-found: evicted.
    #[tokio::test]
    async fn expired_entry_evicted_on_database_not_found() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put_aged(sample_channel(uuid), std::time::Duration::from_secs(61));

        let result = resolve(&cache, "KN", uuid, || async { FetchOutcome::NotFound }).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert!(matches!(cache.get("KN", uuid), Err(CacheError::NotFound)));
    }

    /// Property 6 — cache miss, database has it: cached for next read.
    #[tokio::test]
    async fn miss_then_found_populates_cache() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        let channel = sample_channel(uuid);

        let result = resolve(&cache, "KN", uuid, || async { FetchOutcome::Found(channel) }).await;
        assert!(result.is_ok());
        assert!(cache.get("KN", uuid).is_ok());
    }

    /// Property 6, address path — expired hit, database unavailable:
    /// stale value wins. Mirrors `expired_entry_survives_database_failure`
    /// but through `get_by_address`'s `resolve_by_address` helper.
    #[tokio::test]
    async fn expired_address_hit_survives_database_failure() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put_aged(sample_channel(uuid), std::time::Duration::from_secs(61));

        let result = resolve_by_address(&cache, "KN", "2020", || async { FetchOutcome::Failed }).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().uuid, uuid);
    }

    /// Property 6, address path — expired hit, database reports
    /// not-found: evicted from both cache indexes.
    #[tokio::test]
    async fn expired_address_hit_evicted_on_database_not_found() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put_aged(sample_channel(uuid), std::time::Duration::from_secs(61));

        let result = resolve_by_address(&cache, "KN", "2020", || async { FetchOutcome::NotFound }).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert!(matches!(cache.get_by_address("KN", "2020"), Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn wrong_type_never_touches_database() {
        let cache = ChannelCache::new();
        let uuid = Uuid::new_v4();
        cache.put(sample_channel(uuid));

        let result = resolve(&cache, "EX", uuid, || async {
            panic!("database should not be consulted for a wrong-type hit")
        })
        .await;
        assert!(matches!(result, Err(BackendError::Validation(_))));
    }
}
