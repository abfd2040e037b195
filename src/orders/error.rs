use thiserror::Error;

use crate::orders::types::OrderState;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("order {id} not found")]
    NotFound { id: String },

    #[error("order {id} already exists")]
    Duplicate { id: String },

    #[error("order {id} cannot move to {to} from {from}")]
    InvalidTransition {
        id: String,
        from: OrderState,
        to: OrderState,
    },

    #[error("database error: {message}")]
    Database { message: String, is_retryable: bool },

    #[error("stored order is corrupt: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let is_retryable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
        );
        StoreError::Database {
            message: err.to_string(),
            is_retryable,
        }
    }
}
