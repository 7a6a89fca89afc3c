//! Backend error taxonomy (spec §7)

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Malformed payload, unknown status code, invalid URN/timestamp.
    #[error("validation error: {0}")]
    Validation(String),

    /// Channel not in database, message not resolvable from external id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-violation in URN upsert. Internal; drives resolver restart,
    /// never surfaced past the resolver.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database or KV unavailable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Adapter's send returned an error or non-2xx.
    #[error("downstream vendor failure: {0}")]
    Vendor(String),

    #[error("spool error: {0}")]
    Spool(String),

    #[error("kv error: {0}")]
    Kv(String),
}

impl From<courier_db::DbError> for BackendError {
    fn from(err: courier_db::DbError) -> Self {
        match err {
            courier_db::DbError::NotFound => BackendError::NotFound("row not found".to_string()),
            other => BackendError::Transient(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        BackendError::Kv(err.to_string())
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Spool(err.to_string())
    }
}

impl From<BackendError> for courier_core::CourierError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Validation(m) => courier_core::CourierError::Validation(m),
            BackendError::NotFound(m) => courier_core::CourierError::NotFound(m),
            BackendError::Conflict(m) => courier_core::CourierError::Conflict(m),
            BackendError::Transient(m) => courier_core::CourierError::Unavailable(m),
            BackendError::Vendor(m) => courier_core::CourierError::Network(m),
            BackendError::Spool(m) => courier_core::CourierError::Internal(m),
            BackendError::Kv(m) => courier_core::CourierError::Kv(m),
        }
    }
}
