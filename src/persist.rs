//! Persistence instructions produced for every analyzed pair.
//!
//! The session never writes anything itself. It hands the sink upsert
//! directives shaped like a document-store bulk write: match on the pair
//! selector, `$set` the scoring fields, insert when nothing matches.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analyzer::TimingScore;
use crate::input::{PairInput, PairKey, ProxyHost};

/// Default destination table for proxy beacon results.
pub const DEFAULT_BEACON_PROXY_TABLE: &str = "beaconProxy";

/// Fields written for one pair. Field names are the flat, dotted document paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyBeaconFields {
    pub connection_count: i64,
    pub proxy: ProxyHost,
    pub src_network_name: String,
    #[serde(rename = "ts.range")]
    pub ts_range: i64,
    #[serde(rename = "ts.mode")]
    pub ts_mode: i64,
    #[serde(rename = "ts.mode_count")]
    pub ts_mode_count: i64,
    #[serde(rename = "ts.intervals")]
    pub ts_intervals: Vec<i64>,
    #[serde(rename = "ts.interval_counts")]
    pub ts_interval_counts: Vec<i64>,
    #[serde(rename = "ts.dispersion")]
    pub ts_dispersion: i64,
    #[serde(rename = "ts.skew")]
    pub ts_skew: f64,
    #[serde(rename = "ts.conns_score")]
    pub ts_conns_score: f64,
    #[serde(rename = "ts.score")]
    pub ts_score: f64,
    pub score: f64,
    /// Chunk id, 0 outside rolling analysis.
    pub cid: i32,
}

/// Replace-these-fields update document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyBeaconUpdate {
    #[serde(rename = "$set")]
    pub set: ProxyBeaconFields,
}

/// One upsert directive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkChange {
    pub selector: PairKey,
    pub update: ProxyBeaconUpdate,
    pub upsert: bool,
}

impl BulkChange {
    /// Builds the upsert for an analyzed pair, consuming the input.
    pub fn for_pair(input: PairInput, score: TimingScore, chunk: i32) -> Self {
        let hist = score.histogram;

        Self {
            selector: input.hosts,
            update: ProxyBeaconUpdate {
                set: ProxyBeaconFields {
                    connection_count: input.connection_count,
                    proxy: input.proxy,
                    src_network_name: input.src_network_name,
                    ts_range: score.range,
                    ts_mode: hist.mode,
                    ts_mode_count: hist.mode_count,
                    ts_intervals: hist.intervals,
                    ts_interval_counts: hist.counts,
                    ts_dispersion: score.dispersion,
                    ts_skew: score.skew,
                    ts_conns_score: score.conns_score,
                    ts_score: score.ts_score,
                    score: score.score,
                    cid: chunk,
                },
            },
            upsert: true,
        }
    }

    /// Overall score carried by this directive.
    pub fn score(&self) -> f64 {
        self.update.set.score
    }
}

/// Directives grouped by destination table name.
pub type BulkChanges = BTreeMap<String, Vec<BulkChange>>;

/// Wraps a single directive for `table`.
pub fn single_change(table: &str, change: BulkChange) -> BulkChanges {
    let mut changes = BulkChanges::new();
    changes.insert(table.to_string(), vec![change]);
    changes
}
