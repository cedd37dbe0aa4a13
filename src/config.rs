//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use connpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_size(10)
///     .with_checkout_timeout(Duration::from_secs(2))
///     .with_max_age(Duration::from_secs(300));
///
/// assert_eq!(config.size, 10);
/// assert_eq!(config.max_age, Some(Duration::from_secs(300)));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolConfig {
    /// Number of connections the pool may hold. Zero is legal and makes
    /// every checkout wait for a connection that never arrives.
    pub size: usize,

    /// How long a checkout waits for a connection when none is available.
    /// Zero means "fail immediately", never "wait forever".
    pub checkout_timeout: Duration,

    /// Maximum lifetime of a connection before it is recycled on its next
    /// checkout or checkin. `None` means connections never age out.
    pub max_age: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            checkout_timeout: Duration::from_secs(1),
            max_age: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of pooled connections
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the default checkout timeout
    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Set the maximum connection age
    ///
    /// # Examples
    ///
    /// ```
    /// use connpool::PoolConfig;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfig::new().with_max_age(Duration::from_secs(60));
    /// assert!(config.validate().is_ok());
    ///
    /// let config = PoolConfig::new().with_max_age(Duration::ZERO);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Validate the configuration. Run by [`Pool::new`](crate::Pool::new).
    pub fn validate(&self) -> PoolResult<()> {
        if let Some(max_age) = self.max_age {
            if max_age.is_zero() {
                return Err(PoolError::InvalidConfig("max_age must be greater than zero"));
            }
        }
        Ok(())
    }
}
