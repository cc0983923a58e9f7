//! Metrics for the commit and access paths
//!
//! Counters are registered once with the default Prometheus registry and
//! shared by every unit of the process.

use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};

/// Commit protocol counters
pub struct CommitMetrics {
    /// Completed commits, counted once per unit
    pub commits: IntCounter,
    /// Commits that ended in a collective failure
    pub failures: IntCounter,
    /// Buckets that became valid
    pub buckets_attached: IntCounter,
    /// Buckets whose memory was released after the grace period
    pub buckets_released: IntCounter,
    /// Wall time of successful commits in seconds
    pub duration: Histogram,
}

/// Local resize and remote access counters
pub struct AccessMetrics {
    /// Elements added by grow
    pub elements_grown: IntCounter,
    /// Elements removed by shrink
    pub elements_shrunk: IntCounter,
    /// One-sided reads issued
    pub remote_gets: IntCounter,
    /// One-sided writes issued
    pub remote_puts: IntCounter,
    /// References that resolved to a released bucket
    pub stale_references: IntCounter,
}

/// All globmem metrics
pub struct Metrics {
    /// Commit protocol
    pub commit: CommitMetrics,
    /// Resize and access paths
    pub access: AccessMetrics,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            commit: CommitMetrics {
                commits: register_int_counter!("globmem_commits_total", "Completed commits")?,
                failures: register_int_counter!(
                    "globmem_commit_failures_total",
                    "Commits aborted by a collective failure"
                )?,
                buckets_attached: register_int_counter!(
                    "globmem_buckets_attached_total",
                    "Buckets attached to the global layout"
                )?,
                buckets_released: register_int_counter!(
                    "globmem_buckets_released_total",
                    "Buckets released after their grace period"
                )?,
                duration: register_histogram!(
                    "globmem_commit_duration_seconds",
                    "Duration of successful commits",
                    vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
                )?,
            },
            access: AccessMetrics {
                elements_grown: register_int_counter!(
                    "globmem_elements_grown_total",
                    "Elements added to local partitions"
                )?,
                elements_shrunk: register_int_counter!(
                    "globmem_elements_shrunk_total",
                    "Elements removed from local partitions"
                )?,
                remote_gets: register_int_counter!("globmem_remote_gets_total", "One-sided reads")?,
                remote_puts: register_int_counter!("globmem_remote_puts_total", "One-sided writes")?,
                stale_references: register_int_counter!(
                    "globmem_stale_references_total",
                    "References resolved after their bucket was released"
                )?,
            },
        })
    }
}

static INSTANCE: Lazy<Option<Metrics>> = Lazy::new(|| Metrics::new().ok());

/// Process-wide metrics, `None` if registration was refused
pub fn global() -> Option<&'static Metrics> {
    INSTANCE.as_ref()
}

/// Apply `f` to the global metrics if they are available
pub fn record(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = global() {
        f(metrics);
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        record(|m| m.access.elements_grown.inc_by(3));
        let text = gather_text();
        assert!(text.contains("globmem_elements_grown_total"));
        assert!(global().is_some());
    }
}
