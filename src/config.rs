//! Configuration Module
//!
//! Provides TOML-based configuration for beacon-proxy.
//! Configuration is optional - CLI arguments override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::OutputFormat;
use crate::persist::DEFAULT_BEACON_PROXY_TABLE;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    pub database: DatabaseConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.analyzer.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.analyzer.score_threshold) {
            anyhow::bail!("score_threshold must be between 0.0 and 1.0");
        }
        if self.database.beacon_proxy_table.trim().is_empty() {
            anyhow::bail!("beacon_proxy_table must not be empty");
        }
        Ok(())
    }
}

/// Analyzer-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Queue slots between producers and the analysis worker
    pub channel_capacity: usize,
    /// Scores at or above this are counted as flagged
    pub score_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            score_threshold: 0.7,
        }
    }
}

/// Destination names for the persistence instructions
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub beacon_proxy_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            beacon_proxy_table: DEFAULT_BEACON_PROXY_TABLE.to_string(),
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Enable verbose logging
    pub verbose: bool,
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
