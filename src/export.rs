//! Export Module
//!
//! Renders the persistence instructions produced by a session as text,
//! pretty JSON or JSON Lines, with a score summary for the whole run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};

use crate::persist::{BulkChange, BulkChanges};
use crate::source::SourceStats;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

/// Score distribution across every pair of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub pairs: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreSummary {
    /// Summarizes directive scores; `None` when there are none.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }

        let mut data = Data::new(scores.to_vec());

        Some(Self {
            pairs: scores.len(),
            mean: data.mean().unwrap_or(0.0),
            median: data.median(),
            min: data.min(),
            max: data.max(),
        })
    }
}

/// Everything the sink received during one session, in delivery order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub chunk: i32,
    pub changes: Vec<BulkChanges>,
    /// How the input file was read.
    pub source: SourceStats,
}

impl RunReport {
    pub fn new(chunk: i32, changes: Vec<BulkChanges>) -> Self {
        Self {
            timestamp: Utc::now(),
            chunk,
            changes,
            source: SourceStats::default(),
        }
    }

    pub fn with_source(mut self, source: SourceStats) -> Self {
        self.source = source;
        self
    }

    /// Every directive paired with its destination table.
    pub fn directives(&self) -> impl Iterator<Item = (&str, &BulkChange)> {
        self.changes.iter().flat_map(|changes| {
            changes
                .iter()
                .flat_map(|(table, list)| list.iter().map(move |c| (table.as_str(), c)))
        })
    }

    pub fn summary(&self) -> Option<ScoreSummary> {
        let scores: Vec<f64> = self.directives().map(|(_, c)| c.score()).collect();
        ScoreSummary::from_scores(&scores)
    }
}

/// JSON-serializable run report
#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    timestamp: String,
    chunk: i32,
    source: &'a SourceStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ScoreSummary>,
    changes: &'a [BulkChanges],
}

/// One directive per JSONL line
#[derive(Serialize)]
struct JsonLine<'a> {
    table: &'a str,
    #[serde(flatten)]
    change: &'a BulkChange,
}

/// Exports a report in the specified format
pub fn export_report(report: &RunReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => export_text(report),
        OutputFormat::Json => export_json(report),
        OutputFormat::JsonLines => export_jsonl(report),
    }
}

/// Exports report as pretty-printed JSON
pub fn export_json(report: &RunReport) -> String {
    let json_report = JsonReport {
        version: "1.0",
        timestamp: report.timestamp.to_rfc3339(),
        chunk: report.chunk,
        source: &report.source,
        summary: report.summary(),
        changes: &report.changes,
    };
    serde_json::to_string_pretty(&json_report)
        .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Exports report as JSON Lines (one directive per line)
pub fn export_jsonl(report: &RunReport) -> String {
    let mut lines = Vec::new();

    // First line is the summary
    let summary = serde_json::json!({
        "type": "summary",
        "timestamp": report.timestamp.to_rfc3339(),
        "chunk": report.chunk,
        "source": report.source,
        "summary": report.summary(),
    });
    lines.push(serde_json::to_string(&summary).unwrap_or_default());

    for (table, change) in report.directives() {
        if let Ok(line) = serde_json::to_string(&JsonLine { table, change }) {
            lines.push(line);
        }
    }

    lines.join("\n")
}

/// Exports report as formatted text
pub fn export_text(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "--- Proxy Beacon Report ---\nTime: {}\nChunk: {}\nRecords: {} parsed, {} skipped\n",
        report.timestamp.format("%Y-%m-%d %H:%M:%S"),
        report.chunk,
        report.source.records_parsed,
        report.source.records_skipped
    ));

    match report.summary() {
        None => output.push_str("Pairs Analyzed: 0\n"),
        Some(summary) => {
            output.push_str(&format!(
                "Pairs Analyzed: {}\nScore: mean {:.3} | median {:.3} | min {:.3} | max {:.3}\n\n",
                summary.pairs, summary.mean, summary.median, summary.min, summary.max
            ));
            output.push_str(&format!(
                "{:<7} {:<40} {:<40} {:>8} {:>10} {:>6}\n",
                "Score", "Source", "FQDN", "Conns", "Mode", "Skew"
            ));
            output.push_str(&"-".repeat(116));
            output.push('\n');

            for (_, change) in report.directives() {
                let set = &change.update.set;
                output.push_str(&format!(
                    "{:<7.3} {:<40} {:<40} {:>8} {:>10} {:>6.3}\n",
                    set.score,
                    change.selector.src,
                    change.selector.fqdn,
                    set.connection_count,
                    format_interval(set.ts_mode),
                    set.ts_skew,
                ));
            }
        }
    }

    output
}

/// Formats an interval in seconds in a human-readable way
fn format_interval(secs: i64) -> String {
    match secs {
        s if s >= 3600 => format!("{:.1}h", s as f64 / 3600.0),
        s if s >= 60 => format!("{:.1}m", s as f64 / 60.0),
        s => format!("{}s", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{score_timestamps, TimeWindow};
    use crate::input::tests::pair;
    use crate::persist::{single_change, DEFAULT_BEACON_PROXY_TABLE};

    fn report() -> RunReport {
        let window = TimeWindow::new(0, 3600);
        let changes = [
            pair("10.0.0.1", "a.example", vec![0, 10, 20, 30], 4),
            pair("10.0.0.2", "b.example", vec![0, 0, 0, 5, 15, 30], 6),
        ]
        .into_iter()
        .map(|input| {
            let score = score_timestamps(&input.ts_list, input.connection_count, window);
            single_change(DEFAULT_BEACON_PROXY_TABLE, BulkChange::for_pair(input, score, 2))
        })
        .collect();

        RunReport::new(2, changes).with_source(SourceStats {
            lines_read: 4,
            records_parsed: 3,
            records_skipped: 1,
        })
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "jsonl".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonLines
        );
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::JsonLines.to_string(), "jsonl");
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "0s");
        assert_eq!(format_interval(45), "45s");
        assert_eq!(format_interval(90), "1.5m");
        assert_eq!(format_interval(7200), "2.0h");
    }

    #[test]
    fn test_score_summary() {
        let summary = ScoreSummary::from_scores(&[0.5, 1.0, 0.75]).unwrap();
        assert_eq!(summary.pairs, 3);
        assert!((summary.mean - 0.75).abs() < 1e-12);
        assert!((summary.median - 0.75).abs() < 1e-12);
        assert_eq!(summary.min, 0.5);
        assert_eq!(summary.max, 1.0);

        assert!(ScoreSummary::from_scores(&[]).is_none());
    }

    #[test]
    fn test_export_jsonl() {
        let output = export_jsonl(&report());
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);

        let summary: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(summary["type"], "summary");
        assert_eq!(summary["summary"]["pairs"], 2);
        assert_eq!(summary["source"]["records_skipped"], 1);

        let first: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["table"], "beaconProxy");
        assert_eq!(first["selector"]["fqdn"], "a.example");
        assert_eq!(first["update"]["$set"]["score"], 1.0);
        assert_eq!(first["update"]["$set"]["cid"], 2);
    }

    #[test]
    fn test_export_json() {
        let output = export_json(&report());
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["chunk"], 2);
        assert_eq!(json["changes"].as_array().unwrap().len(), 2);
        assert_eq!(json["summary"]["max"], 1.0);
        assert_eq!(json["source"]["records_parsed"], 3);
        assert_eq!(json["source"]["records_skipped"], 1);
    }

    #[test]
    fn test_export_text() {
        let output = export_text(&report());
        assert!(output.contains("Pairs Analyzed: 2"));
        assert!(output.contains("Records: 3 parsed, 1 skipped"));
        assert!(output.contains("a.example"));
        assert!(output.contains("b.example"));

        let empty = export_text(&RunReport::new(0, Vec::new()));
        assert!(empty.contains("Pairs Analyzed: 0"));
    }
}
