//! Error types for the connection pool

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by application-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no connect function configured for this pool")]
    ConnectNotConfigured,

    #[error("timed out waiting for a connection (requested {requested:?}, waited {waited:?})")]
    CheckoutTimeout {
        requested: Duration,
        waited: Duration,
    },

    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("checked in a connection that was not checked out from this pool")]
    UnknownCheckin,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("pooled operation was cancelled")]
    Cancelled,

    /// Failure raised by an application-supplied connect or disconnect
    /// callback, passed through unwrapped.
    #[error("{0}")]
    Callback(BoxError),
}

impl From<BoxError> for PoolError {
    fn from(err: BoxError) -> Self {
        PoolError::Callback(err)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
