//! Timing analysis module - the statistics engine applied to every host pair.
//!
//! Scores how regular the connections between a source and a proxied FQDN
//! are. Regular (periodic) timing is what automated C2 check-ins look like;
//! human-driven traffic is irregular.
//!
//! # Statistical Methodology
//!
//! ## Delta Calculation
//! For sorted timestamps [t₀, t₁, ..., tₙ] the intervals are
//! Δᵢ = tᵢ₊₁ - tᵢ, sorted ascending. Zero intervals (duplicate timestamps)
//! are dropped for skew and dispersion but kept for the histogram.
//!
//! ## Skew (Bowley)
//! skew = (Q1 + Q3 - 2·Q2) / (Q3 - Q1), defined as 0 when Q2 = Q1 or Q2 = Q3.
//! A perfect beacon has a symmetric interval distribution.
//!
//! ## Dispersion (MADM)
//! Median absolute deviation about the median. A perfect beacon has almost
//! none.
//!
//! ## Score
//! score = ⌈((1 - |skew|) + (1 - MADM/Q2) + min(1, conns/hours)) / 3⌉₀.₀₀₁

use serde::Serialize;

/// Observation window shared by every pair of one analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub min: i64,
    pub max: i64,
}

impl TimeWindow {
    pub fn new(min: i64, max: i64) -> Self {
        debug_assert!(max >= min, "time window max must not precede min");
        Self { min, max }
    }

    /// Width in hours used for the connection rate term.
    ///
    /// A zero-width window is clamped to one second so the rate stays finite.
    pub fn hours(&self) -> f64 {
        let width = (self.max - self.min).max(1);
        width as f64 / 3600.0
    }
}

/// Distinct intervals in ascending order with their occurrence counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalHistogram {
    pub intervals: Vec<i64>,
    pub counts: Vec<i64>,
    pub mode: i64,
    pub mode_count: i64,
}

/// Every statistic computed for a single pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingScore {
    /// Spread of the non-zero intervals.
    pub range: i64,
    pub histogram: IntervalHistogram,
    /// Median absolute deviation about the median.
    pub dispersion: i64,
    pub skew: f64,
    pub skew_score: f64,
    pub dispersion_score: f64,
    pub conns_score: f64,
    /// Timing-only score. Currently identical to `score`.
    pub ts_score: f64,
    pub score: f64,
}

/// Index of the `q` quantile in a sorted slice of length `len`.
///
/// Uses `round(q * (len - 1))` with halves rounded up.
pub fn quantile_index(q: f64, len: usize) -> usize {
    debug_assert!(len > 0, "quantile of an empty slice");
    (q * (len - 1) as f64 + 0.5).floor() as usize
}

/// Bowley's quartile skew. Zero when the quartiles are degenerate.
pub fn bowley_skew(low: i64, mid: i64, high: i64) -> f64 {
    let num = low + high - 2 * mid;
    let den = high - low;

    // Bowley skew is unreliable if Q2 = Q1 or Q2 = Q3
    if den != 0 && mid != low && mid != high {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Median absolute deviation of `diff` about `mid`.
pub fn median_absolute_deviation(diff: &[i64], mid: i64) -> i64 {
    let mut devs: Vec<i64> = diff.iter().map(|d| (d - mid).abs()).collect();
    devs.sort_unstable();
    devs[quantile_index(0.5, devs.len())]
}

/// Builds the interval histogram from an ascending slice.
///
/// The mode is the value with the strictly greatest count; on ties the
/// smallest value wins because later equal counts never replace it.
pub fn interval_histogram(sorted: &[i64]) -> IntervalHistogram {
    debug_assert!(!sorted.is_empty(), "histogram of an empty slice");

    let mut intervals: Vec<i64> = Vec::with_capacity(sorted.len() / 2 + 1);
    let mut counts: Vec<i64> = Vec::with_capacity(sorted.len() / 2 + 1);

    for &value in sorted {
        match intervals.last() {
            Some(&last) if last == value => {
                if let Some(count) = counts.last_mut() {
                    *count += 1;
                }
            }
            _ => {
                intervals.push(value);
                counts.push(1);
            }
        }
    }

    let mut mode = intervals[0];
    let mut mode_count = counts[0];
    for (&value, &count) in intervals.iter().zip(&counts) {
        if count > mode_count {
            mode = value;
            mode_count = count;
        }
    }

    IntervalHistogram {
        intervals,
        counts,
        mode,
        mode_count,
    }
}

/// Converts sorted timestamps to sorted inter-arrival deltas.
pub fn sorted_deltas(ts_list: &[i64]) -> Vec<i64> {
    let mut deltas: Vec<i64> = ts_list.windows(2).map(|w| w[1] - w[0]).collect();
    deltas.sort_unstable();
    deltas
}

/// Rounds up to three decimal places.
fn ceil_thousandths(value: f64) -> f64 {
    (value * 1000.0).ceil() / 1000.0
}

/// Scores the timing regularity of one host pair.
///
/// `ts_list` must be ascending with at least three distinct values; this is
/// only checked in debug builds.
pub fn score_timestamps(ts_list: &[i64], connection_count: i64, window: TimeWindow) -> TimingScore {
    let diff_full = sorted_deltas(ts_list);

    // First strictly positive interval; everything before it is a zero
    let non_zero_idx = diff_full.iter().position(|&d| d > 0).unwrap_or(0);
    let diff = &diff_full[non_zero_idx..];
    debug_assert!(
        diff.len() >= 2 && diff[0] > 0,
        "pair needs at least three distinct timestamps"
    );

    let len = diff.len();
    let low = diff[quantile_index(0.25, len)];
    let mid = diff[quantile_index(0.5, len)];
    let high = diff[quantile_index(0.75, len)];

    let skew = bowley_skew(low, mid, high);
    let dispersion = median_absolute_deviation(diff, mid);
    let range = diff[len - 1] - diff[0];
    let histogram = interval_histogram(&diff_full);

    // more skewed distributions receive a lower score
    let skew_score = 1.0 - skew.abs();

    // lower dispersion is better
    let mut dispersion_score = 1.0;
    if mid >= 1 {
        dispersion_score = 1.0 - dispersion as f64 / mid as f64;
    }
    if dispersion_score < 0.0 {
        dispersion_score = 0.0;
    }

    let conns_score = (connection_count as f64 / window.hours()).min(1.0);

    let sum = skew_score + dispersion_score + conns_score;
    let ts_score = ceil_thousandths(sum / 3.0);

    TimingScore {
        range,
        histogram,
        dispersion,
        skew,
        skew_score,
        dispersion_score,
        conns_score,
        ts_score,
        score: ts_score,
    }
}
