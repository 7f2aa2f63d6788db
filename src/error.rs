use thiserror::Error as ThisError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an ingestion or analysis call can fail.
///
/// All of these surface immediately to the caller. Nothing is retried: the
/// operations are pure computations over data that has already been parsed.
#[derive(Debug, ThisError)]
pub enum Error {
    // ── Invalid parameters ──────────────────────────────────────
    #[error("timestamp must be >= 0, got {timestamp}")]
    NegativeTimestamp { timestamp: i64 },

    #[error("percentile must be within [0, 100], got {percentile}")]
    PercentileOutOfRange { percentile: f64 },

    #[error("highest percentile must be >= 1, got {highest}")]
    InvalidHighestPercentile { highest: i32 },

    #[error("{what} must be a positive duration, got {millis} ms")]
    NonPositiveDuration { what: &'static str, millis: i64 },

    #[error("histogram needs at least one range, got {ranges}")]
    InvalidHistogramRanges { ranges: i32 },

    #[error("histogram percentiles must satisfy 0 <= min <= max <= 100, got min {min} max {max}")]
    InvalidHistogramPercentiles { min: f64, max: f64 },

    #[error("metadata has {fields} fields but {values} values")]
    MetadataArity { fields: usize, values: usize },

    #[error("histogram error: {0}")]
    Histogram(String),

    // ── Invalid state ───────────────────────────────────────────
    #[error("time period needs both bounds set or both unset")]
    HalfDefinedPeriod,

    #[error("time period end {end} is before start {start}")]
    PeriodEndBeforeStart { start: i64, end: i64 },

    #[error("{operation} needs a time period with both bounds set")]
    UndefinedPeriod { operation: &'static str },

    // ── Unsupported operation ───────────────────────────────────
    #[error("cannot add samples to read-only counter \"{name}\"")]
    ReadOnly { name: String },

    // ── Configuration ───────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Backend failures ────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spill file encoding error: {0}")]
    Spill(#[from] bincode::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
