//! Pair records handed to the analysis session.
//!
//! A record describes every connection one internal source made to one FQDN
//! through one proxy during the observation window.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a proxied host pair.
/// Composed of source IP, source network and the FQDN requested through the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub src: IpAddr,
    pub src_network_uuid: String,
    pub fqdn: String,
}

impl PairKey {
    pub fn new(src: IpAddr, src_network_uuid: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            src,
            src_network_uuid: src_network_uuid.into(),
            fqdn: fqdn.into(),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} (net {})", self.src, self.fqdn, self.src_network_uuid)
    }
}

/// The proxy the pair's connections went through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyHost {
    pub ip: IpAddr,
    pub network_uuid: String,
    pub network_name: String,
}

/// Sorted connection timestamps for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairInput {
    pub hosts: PairKey,
    pub src_network_name: String,
    pub proxy: ProxyHost,
    /// Ascending epoch seconds.
    pub ts_list: Vec<i64>,
    pub connection_count: i64,
}

impl PairInput {
    /// Number of distinct timestamps, assuming `ts_list` is ascending.
    pub fn distinct_timestamps(&self) -> usize {
        let mut distinct = 0;
        let mut last = None;
        for &ts in &self.ts_list {
            if last != Some(ts) {
                distinct += 1;
                last = Some(ts);
            }
        }
        distinct
    }

    /// Whether the record can be scored: ascending with three distinct timestamps.
    pub fn is_scorable(&self) -> bool {
        self.ts_list.windows(2).all(|w| w[0] <= w[1]) && self.distinct_timestamps() >= 3
    }
}
