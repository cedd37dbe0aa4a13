//! Metrics collection and export for pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use connpool::{Pool, PoolConfig};
///
/// let pool = Pool::with_connector(PoolConfig::new().with_size(2), || Ok(0u32)).unwrap();
/// let conn = pool.checkout().unwrap();
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.checkouts, 1);
/// assert_eq!(metrics.checked_out_connections, 1);
/// # pool.checkin(conn).unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Successful checkouts over the pool's lifetime
    pub checkouts: usize,

    /// Successful checkins over the pool's lifetime
    pub checkins: usize,

    /// Checkouts that gave up waiting
    pub timeouts: usize,

    /// Connections discarded by the expiration policy
    pub recycled: usize,

    /// Raw connections ever created
    pub connections_created: usize,

    /// Raw connections ever torn down
    pub connections_closed: usize,

    /// Idle connections currently in the pool
    pub available_connections: usize,

    /// Connections currently checked out
    pub checked_out_connections: usize,

    /// Pool capacity
    pub capacity: usize,

    /// Checked-out share of capacity (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a string map
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("checkouts".to_string(), self.checkouts.to_string());
        metrics.insert("checkins".to_string(), self.checkins.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("recycled".to_string(), self.recycled.to_string());
        metrics.insert(
            "connections_created".to_string(),
            self.connections_created.to_string(),
        );
        metrics.insert(
            "connections_closed".to_string(),
            self.connections_closed.to_string(),
        );
        metrics.insert(
            "available_connections".to_string(),
            self.available_connections.to_string(),
        );
        metrics.insert(
            "checked_out_connections".to_string(),
            self.checked_out_connections.to_string(),
        );
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus exposition format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use connpool::{MetricsExporter, Pool, PoolConfig};
    ///
    /// let pool = Pool::with_connector(PoolConfig::default(), || Ok(0u32)).unwrap();
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "redis", None);
    /// assert!(output.contains("connpool_connections_checked_out"));
    /// assert!(output.contains("pool=\"redis\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        output.push_str("# HELP connpool_connections_checked_out Connections currently checked out\n");
        output.push_str("# TYPE connpool_connections_checked_out gauge\n");
        output.push_str(&format!(
            "connpool_connections_checked_out{{{}}} {}\n",
            labels, metrics.checked_out_connections
        ));

        output.push_str("# HELP connpool_connections_available Idle connections in the pool\n");
        output.push_str("# TYPE connpool_connections_available gauge\n");
        output.push_str(&format!(
            "connpool_connections_available{{{}}} {}\n",
            labels, metrics.available_connections
        ));

        output.push_str("# HELP connpool_utilization Checked-out share of capacity\n");
        output.push_str("# TYPE connpool_utilization gauge\n");
        output.push_str(&format!(
            "connpool_utilization{{{}}} {:.2}\n",
            labels, metrics.utilization
        ));

        // Counter metrics
        output.push_str("# HELP connpool_checkouts_total Successful checkouts\n");
        output.push_str("# TYPE connpool_checkouts_total counter\n");
        output.push_str(&format!(
            "connpool_checkouts_total{{{}}} {}\n",
            labels, metrics.checkouts
        ));

        output.push_str("# HELP connpool_timeouts_total Checkouts that timed out\n");
        output.push_str("# TYPE connpool_timeouts_total counter\n");
        output.push_str(&format!(
            "connpool_timeouts_total{{{}}} {}\n",
            labels, metrics.timeouts
        ));

        output.push_str("# HELP connpool_recycled_total Connections discarded by expiration\n");
        output.push_str("# TYPE connpool_recycled_total counter\n");
        output.push_str(&format!(
            "connpool_recycled_total{{{}}} {}\n",
            labels, metrics.recycled
        ));

        output.push_str("# HELP connpool_connections_created_total Raw connections created\n");
        output.push_str("# TYPE connpool_connections_created_total counter\n");
        output.push_str(&format!(
            "connpool_connections_created_total{{{}}} {}\n",
            labels, metrics.connections_created
        ));

        output.push_str("# HELP connpool_connections_closed_total Raw connections torn down\n");
        output.push_str("# TYPE connpool_connections_closed_total counter\n");
        output.push_str(&format!(
            "connpool_connections_closed_total{{{}}} {}\n",
            labels, metrics.connections_closed
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal counter tracker
pub(crate) struct MetricsTracker {
    pub checkouts: AtomicUsize,
    pub checkins: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub recycled: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            checkouts: AtomicUsize::new(0),
            checkins: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(
        &self,
        created: usize,
        closed: usize,
        available: usize,
        checked_out: usize,
        capacity: usize,
    ) -> PoolMetrics {
        let utilization = if capacity > 0 {
            checked_out as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            connections_created: created,
            connections_closed: closed,
            available_connections: available,
            checked_out_connections: checked_out,
            capacity,
            utilization,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
