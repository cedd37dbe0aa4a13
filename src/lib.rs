//! # connpool
//!
//! Thread-safe connection pool for sharing a bounded set of
//! expensive-to-create resources (typically network connections) among
//! concurrent workers.
//!
//! ## Features
//!
//! - Lazy connection creation up to a fixed capacity
//! - Timeout-bounded blocking checkout with first-come-first-served waiters
//! - Exclusive ownership: a checked-out connection has exactly one holder
//! - Age-based recycling, explicit expiration and pluggable validation
//! - Graceful shutdown that defers teardown of connections still in use
//! - Scoped `with` acquisition that returns the connection on every exit path
//! - Async adapter for use inside a tokio runtime
//! - Pass-through proxy exposing the pool as a single connection
//! - Metrics snapshot with Prometheus-format export
//!
//! ## Quick Start
//!
//! ```rust
//! use connpool::{Pool, PoolConfig};
//!
//! let pool = Pool::with_connector(PoolConfig::new().with_size(5), || {
//!     // open a network connection here
//!     Ok(String::from("connection"))
//! })
//! .unwrap();
//!
//! let length = pool.with(|conn| conn.len()).unwrap();
//! assert_eq!(length, 10);
//! ```

mod config;
mod errors;
mod manager;
mod metrics;
mod pool;
mod proxy;
mod stack;
mod wrapper;

pub use config::PoolConfig;
pub use errors::{BoxError, PoolError, PoolResult};
pub use manager::{ConnectFn, ConnectionManager, DisconnectFn, ValidateFn};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::Pool;
pub use proxy::PoolProxy;
pub use stack::TimedStack;
pub use wrapper::ConnectionWrapper;
