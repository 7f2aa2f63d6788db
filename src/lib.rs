//! Streaming response-time analytics.
//!
//! Log parsers feed `(counter, timestamp, duration, success)` samples into
//! a bounded [`CounterStore`]; a [`ResponseTimeAnalyser`] then answers hit
//! counts, percentiles, rates and concurrency for one counter over one
//! period, in a single ascending pass per metric.

pub mod analysis;
pub mod config;
pub mod counter;
pub mod error;
pub mod generator;
pub mod period;
pub mod stats;
pub mod store;
pub mod summary;

pub use analysis::{AnalyserFactory, FailureMode, ResponseTimeAnalyser};
pub use config::AnalysisConfig;
pub use counter::{CounterKey, CounterKeyMetaData, CounterStore, CounterStorePair, RequestCounter};
pub use error::{Error, Result};
pub use period::TimePeriod;
pub use stats::{HistogramData, StatisticsEngine};
pub use store::{StoreFactory, TimeMeasurement, TimeSeriesStore};
pub use summary::ResponseTimeSummary;
