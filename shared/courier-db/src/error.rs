//! Database error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("query error: {0}")]
    Query(tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("row not found")]
    NotFound,
}

impl From<DbError> for courier_core::CourierError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => courier_core::CourierError::NotFound("row not found".to_string()),
            other => courier_core::CourierError::Database(other.to_string()),
        }
    }
}
