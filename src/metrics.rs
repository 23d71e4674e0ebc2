//! Session Metrics Module
//!
//! Counters updated by producers and the analysis worker, rendered in
//! Prometheus text format.
//!
//! # Metrics Exported
//!
//! - `beacon_proxy_pairs_collected_total` - Pairs handed to `collect`
//! - `beacon_proxy_pairs_skipped_total` - Input records too short to score
//! - `beacon_proxy_pairs_analyzed_total` - Pairs scored by the worker
//! - `beacon_proxy_pairs_flagged_total` - Pairs scoring at or above the threshold
//! - `beacon_proxy_last_score` - Score of the most recent pair

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic metrics counters for thread-safe updates.
#[derive(Debug)]
pub struct Metrics {
    pub pairs_collected: AtomicU64,
    pub pairs_skipped: AtomicU64,
    pub pairs_analyzed: AtomicU64,
    pub pairs_flagged: AtomicU64,
    /// Most recent score in thousandths.
    pub last_score_millis: AtomicU64,
    score_threshold: f64,
}

impl Metrics {
    /// Create new metrics with all counters at zero.
    pub fn new(score_threshold: f64) -> Self {
        Self {
            pairs_collected: AtomicU64::new(0),
            pairs_skipped: AtomicU64::new(0),
            pairs_analyzed: AtomicU64::new(0),
            pairs_flagged: AtomicU64::new(0),
            last_score_millis: AtomicU64::new(0),
            score_threshold,
        }
    }

    pub fn inc_collected(&self) {
        self.pairs_collected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts input records dropped before they reached the session.
    pub fn add_skipped(&self, count: u64) {
        self.pairs_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Records one analyzed pair.
    pub fn record_score(&self, score: f64) {
        self.pairs_analyzed.fetch_add(1, Ordering::Relaxed);
        if score >= self.score_threshold {
            self.pairs_flagged.fetch_add(1, Ordering::Relaxed);
        }
        self.last_score_millis
            .store((score * 1000.0).round() as u64, Ordering::Relaxed);
    }

    pub fn score_threshold(&self) -> f64 {
        self.score_threshold
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP beacon_proxy_pairs_collected_total Pairs queued for analysis\n");
        output.push_str("# TYPE beacon_proxy_pairs_collected_total counter\n");
        output.push_str(&format!(
            "beacon_proxy_pairs_collected_total {}\n\n",
            self.pairs_collected.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP beacon_proxy_pairs_skipped_total Records with fewer than three distinct timestamps\n",
        );
        output.push_str("# TYPE beacon_proxy_pairs_skipped_total counter\n");
        output.push_str(&format!(
            "beacon_proxy_pairs_skipped_total {}\n\n",
            self.pairs_skipped.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP beacon_proxy_pairs_analyzed_total Pairs scored\n");
        output.push_str("# TYPE beacon_proxy_pairs_analyzed_total counter\n");
        output.push_str(&format!(
            "beacon_proxy_pairs_analyzed_total {}\n\n",
            self.pairs_analyzed.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP beacon_proxy_pairs_flagged_total Pairs with score >= {}\n",
            self.score_threshold
        ));
        output.push_str("# TYPE beacon_proxy_pairs_flagged_total counter\n");
        output.push_str(&format!(
            "beacon_proxy_pairs_flagged_total {}\n\n",
            self.pairs_flagged.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP beacon_proxy_last_score Score of the most recent pair\n");
        output.push_str("# TYPE beacon_proxy_last_score gauge\n");
        output.push_str(&format!(
            "beacon_proxy_last_score {:.3}\n",
            self.last_score_millis.load(Ordering::Relaxed) as f64 / 1000.0
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(0.7)
    }
}

/// Shared metrics handle for use across threads.
pub type SharedMetrics = Arc<Metrics>;
