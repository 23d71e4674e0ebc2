//! Pair Source Module
//!
//! Reads pair records from JSON Lines files for offline analysis and derives
//! the observation window when the caller does not provide one.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::TimeWindow;
use crate::error::SourceError;
use crate::input::PairInput;

/// Statistics from reading a pair file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub lines_read: usize,
    pub records_parsed: usize,
    /// Records dropped for having fewer than three distinct timestamps
    pub records_skipped: usize,
}

/// Reads every scorable pair from a JSON Lines file.
pub fn read_pairs(path: &Path) -> Result<(Vec<PairInput>, SourceStats), SourceError> {
    info!("Reading pair records from {}", path.display());

    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (pairs, stats) = parse_pairs(BufReader::new(file), path)?;

    info!(
        "Read {} lines: {} pairs parsed, {} skipped",
        stats.lines_read, stats.records_parsed, stats.records_skipped
    );

    Ok((pairs, stats))
}

fn parse_pairs<R: BufRead>(
    reader: R,
    path: &Path,
) -> Result<(Vec<PairInput>, SourceStats), SourceError> {
    let mut pairs = Vec::new();
    let mut stats = SourceStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        stats.lines_read += 1;

        if line.trim().is_empty() {
            continue;
        }

        let input: PairInput = serde_json::from_str(&line).map_err(|source| SourceError::Parse {
            line: idx + 1,
            source,
        })?;
        stats.records_parsed += 1;

        if !input.is_scorable() {
            warn!(
                "Skipping {} on line {}: needs ascending timestamps with 3 distinct values",
                input.hosts,
                idx + 1
            );
            stats.records_skipped += 1;
            continue;
        }

        pairs.push(input);
    }

    debug!("Parsed {} scorable pairs", pairs.len());
    Ok((pairs, stats))
}

/// Smallest window covering every timestamp, or `None` without pairs.
pub fn derive_window(pairs: &[PairInput]) -> Option<TimeWindow> {
    let min = pairs.iter().filter_map(|p| p.ts_list.first()).min()?;
    let max = pairs.iter().filter_map(|p| p.ts_list.last()).max()?;
    Some(TimeWindow::new(*min, *max))
}
