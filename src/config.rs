use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::period::TimePeriod;

/// Counter cardinality used when none (or zero) is configured.
pub const DEFAULT_MAX_UNIQUE_COUNTERS: usize = 512;

// ─── Analysis configuration ──────────────────────────────────────

/// Everything the engine reads from the host. Every field has a default so
/// an empty JSON object is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Distinct counters kept before new keys go to the overflow counter
    #[serde(default = "default_max_unique_counters")]
    pub max_unique_counters: usize,

    /// Track failed requests separately from successes
    #[serde(default = "default_failure_aware")]
    pub failure_aware_analysis: bool,

    /// Include failed requests in the response-time statistics
    #[serde(default)]
    pub include_failed_hits_in_analysis: bool,

    /// Percentiles reported per counter (each within 0–100)
    #[serde(default = "default_report_percentiles")]
    pub report_percentiles: Vec<f64>,

    /// Analysis window; defaults to the span of the data
    #[serde(default)]
    pub period: Option<PeriodConfig>,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_max_unique_counters() -> usize {
    DEFAULT_MAX_UNIQUE_COUNTERS
}
fn default_failure_aware() -> bool {
    true
}
fn default_report_percentiles() -> Vec<f64> {
    vec![50.0, 90.0, 95.0, 99.0]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_unique_counters: default_max_unique_counters(),
            failure_aware_analysis: default_failure_aware(),
            include_failed_hits_in_analysis: false,
            report_percentiles: default_report_percentiles(),
            period: None,
            storage: StorageConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self
            .report_percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(Error::Config(format!(
                "report percentile {p} is outside 0-100"
            )));
        }
        if self.storage.kind == StorageKind::Spill && self.storage.spill_threshold == 0 {
            return Err(Error::Config("spill_threshold must be > 0".into()));
        }
        self.analysis_period()?;
        Ok(())
    }

    /// Cardinality cap with the zero fallback applied.
    pub fn effective_max_unique_counters(&self) -> usize {
        if self.max_unique_counters == 0 {
            DEFAULT_MAX_UNIQUE_COUNTERS
        } else {
            self.max_unique_counters
        }
    }

    /// The configured period, or the undefined period.
    pub fn analysis_period(&self) -> Result<TimePeriod> {
        match &self.period {
            None => Ok(TimePeriod::UNDEFINED),
            Some(p) => TimePeriod::exclusive(p.start.timestamp_millis(), p.end.timestamp_millis()),
        }
    }
}

/// Half-open analysis window in RFC 3339 form.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ─── Storage configuration ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Spill,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Directory for spilled runs; the system temp dir when unset
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// Buffered samples per store before a run is written
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold: usize,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,
}

fn default_spill_threshold() -> usize {
    100_000
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".into()
}
fn default_redis_key_prefix() -> String {
    "rtstat".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            spill_dir: None,
            spill_threshold: default_spill_threshold(),
            redis_url: default_redis_url(),
            redis_key_prefix: default_redis_key_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = AnalysisConfig::from_json("{}").unwrap();
        assert_eq!(config.max_unique_counters, DEFAULT_MAX_UNIQUE_COUNTERS);
        assert!(config.failure_aware_analysis);
        assert!(!config.include_failed_hits_in_analysis);
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert!(!config.analysis_period().unwrap().is_defined());
    }

    #[test]
    fn zero_cap_falls_back_to_default() {
        let config = AnalysisConfig::from_json(r#"{"max_unique_counters": 0}"#).unwrap();
        assert_eq!(
            config.effective_max_unique_counters(),
            DEFAULT_MAX_UNIQUE_COUNTERS
        );
    }

    #[test]
    fn period_is_parsed_half_open() {
        let config = AnalysisConfig::from_json(
            r#"{"period": {"start": "2024-01-01T00:00:00Z", "end": "2024-01-01T00:01:00Z"}}"#,
        )
        .unwrap();
        let period = config.analysis_period().unwrap();
        assert_eq!(period.duration_millis(), 60_000);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            AnalysisConfig::from_json(r#"{"report_percentiles": [50, 101]}"#),
            Err(Error::Config(_))
        ));
        assert!(AnalysisConfig::from_json(
            r#"{"period": {"start": "2024-01-02T00:00:00Z", "end": "2024-01-01T00:00:00Z"}}"#
        )
        .is_err());
        assert!(AnalysisConfig::from_json(
            r#"{"storage": {"kind": "spill", "spill_threshold": 0}}"#
        )
        .is_err());
    }
}
