//! Response-time analysis of one counter over one period.

pub mod failure;
pub mod window;

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

pub use failure::{AnalyserFactory, FailureMode, FailureTracking};
pub use window::{ConcurrentCounterResult, RatePoint, TransactionCounterResult};

use crate::counter::{CounterKey, RequestCounter};
use crate::error::{Error, Result};
use crate::period::TimePeriod;
use crate::stats::{
    calculator, HistogramData, StatisticsEngine, RELEVANT_MAX_PERCENTILE, RELEVANT_MIN_PERCENTILE,
};

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;

/// Distinct `(bucket, include_tps)` results remembered per analyser.
const MAX_CACHED_RATE_RESULTS: usize = 16;

/// Metric surface for one counter over one analysis period.
///
/// Expensive results (the statistics pass, window maxima, concurrency) are
/// computed on first use and kept for the lifetime of the analyser. Build
/// one analyser per analysis; it is not meant to be shared between threads
/// working on the same counter.
pub struct ResponseTimeAnalyser {
    /// Metrics source, already restricted to `period`.
    counter: RequestCounter,
    period: TimePeriod,
    failure: FailureMode,
    cache: Mutex<Cache>,
}

struct Cache {
    total_hits: Option<u64>,
    statistics: Option<StatisticsEngine>,
    rates: LruCache<(i64, bool), TransactionCounterResult>,
    concurrency: Option<ConcurrentCounterResult>,
}

// ─── Construction ────────────────────────────────────────────────

impl ResponseTimeAnalyser {
    /// Failure-unaware analyser. An undefined `period` means the counter's
    /// own period.
    pub fn new(counter: &RequestCounter, period: &TimePeriod) -> Result<Self> {
        Self::with_failure_mode(counter, period, FailureMode::Unaware)
    }

    pub fn with_failure_mode(
        counter: &RequestCounter,
        period: &TimePeriod,
        failure: FailureMode,
    ) -> Result<Self> {
        let period = match (period.is_defined(), counter.period().is_defined()) {
            (true, _) => *period,
            (false, true) => counter.period(),
            (false, false) => TimePeriod::exclusive(0, 0)?,
        };
        let counter = RequestCounter::safe_sliced_counter(Some(counter), &period)?.into_owned();
        Ok(Self {
            counter,
            period,
            failure,
            cache: Mutex::new(Cache {
                total_hits: None,
                statistics: None,
                rates: LruCache::new(
                    NonZeroUsize::new(MAX_CACHED_RATE_RESULTS).unwrap_or(NonZeroUsize::MIN),
                ),
                concurrency: None,
            }),
        })
    }

    pub fn counter_key(&self) -> &CounterKey {
        self.counter.key()
    }

    pub fn period(&self) -> TimePeriod {
        self.period
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure
    }

    /// Run `f` against the statistics engine, building it on first use.
    fn with_statistics<T>(&self, f: impl FnOnce(&StatisticsEngine) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock();
        if cache.statistics.is_none() {
            cache.statistics = Some(StatisticsEngine::new(&self.counter, &self.period)?);
        }
        match &cache.statistics {
            Some(statistics) => f(statistics),
            None => Err(Error::UndefinedPeriod {
                operation: "statistics",
            }),
        }
    }
}

// ─── Hit counts ──────────────────────────────────────────────────

impl ResponseTimeAnalyser {
    /// Hits of the metrics counter in the period.
    pub fn total_hits(&self) -> Result<u64> {
        let mut cache = self.cache.lock();
        if let Some(hits) = cache.total_hits {
            return Ok(hits);
        }
        let hits = self.counter.hits()?;
        cache.total_hits = Some(hits);
        Ok(hits)
    }

    /// Failed hits in the period; zero when failures are not tracked.
    pub fn failed_hits(&self) -> u64 {
        self.failure.failed_hits()
    }

    pub fn failure_percentage(&self) -> Result<f64> {
        Ok(self.failure.failure_percentage(self.total_hits()?))
    }

    pub fn has_any_hits(&self) -> Result<bool> {
        Ok(self.failure.has_any_hits(self.total_hits()?))
    }

    /// This counter's hits as a share of `overall_total_hits`.
    pub fn percentage(&self, overall_total_hits: u64) -> Result<f64> {
        Ok(calculator::percentage(self.total_hits()?, overall_total_hits))
    }

    /// Hits in `[start, start + 1 minute)`.
    pub fn hits_in_minute_with_start_time(&self, start: i64) -> Result<u64> {
        let minute = TimePeriod::exclusive(start, start.saturating_add(MILLIS_PER_MINUTE))?;
        self.counter.time_sliced_counter(&minute)?.hits()
    }

    pub fn duration_in_hours(&self) -> f64 {
        self.period.duration_millis() as f64 / MILLIS_PER_HOUR as f64
    }

    /// Average hits per second over the whole period.
    pub fn avg_tps(&self) -> Result<f64> {
        let millis = self.period.duration_millis();
        if millis <= 0 {
            return Ok(0.0);
        }
        Ok(self.total_hits()? as f64 / (millis as f64 / MILLIS_PER_SECOND as f64))
    }
}

// ─── Durations ───────────────────────────────────────────────────

impl ResponseTimeAnalyser {
    pub fn min(&self) -> Result<i64> {
        self.with_statistics(|s| Ok(s.min()))
    }

    pub fn max(&self) -> Result<i64> {
        self.with_statistics(|s| Ok(s.max()))
    }

    pub fn avg_hit_duration(&self) -> Result<f64> {
        self.with_statistics(|s| Ok(s.mean()))
    }

    pub fn std_dev_hit_duration(&self) -> Result<f64> {
        self.with_statistics(|s| Ok(s.std_dev()))
    }

    pub fn percentile(&self, percentile: f64) -> Result<i64> {
        self.with_statistics(|s| s.percentile(percentile))
    }

    /// Percentiles `1..=highest`; `highest` is capped at 100.
    pub fn percentiles(&self, highest: i32) -> Result<Vec<i64>> {
        if highest < 1 {
            return Err(Error::InvalidHighestPercentile { highest });
        }
        let highest = highest.min(100);
        self.with_statistics(|s| (1..=highest).map(|p| s.percentile_index(p)).collect())
    }

    /// Histogram between the 1st and 99th percentile.
    pub fn histogram_for_relevant_values(&self, ranges: i32) -> Result<HistogramData> {
        self.with_statistics(|s| {
            s.histogram(ranges, RELEVANT_MIN_PERCENTILE, RELEVANT_MAX_PERCENTILE)
        })
    }

    pub fn histogram(
        &self,
        ranges: i32,
        min_percentile: f64,
        max_percentile: f64,
    ) -> Result<HistogramData> {
        self.with_statistics(|s| s.histogram(ranges, min_percentile, max_percentile))
    }
}

// ─── Rates and concurrency ───────────────────────────────────────

impl ResponseTimeAnalyser {
    pub fn max_hits_per_second(&self) -> Result<u64> {
        Ok(self.max_hits_per_duration(MILLIS_PER_SECOND, false)?.max_count)
    }

    pub fn max_hits_per_minute(&self) -> Result<u64> {
        Ok(self.max_hits_per_duration(MILLIS_PER_MINUTE, false)?.max_count)
    }

    pub fn max_hits_per_hour(&self) -> Result<u64> {
        Ok(self.max_hits_per_duration(MILLIS_PER_HOUR, false)?.max_count)
    }

    /// Busiest trailing window of `bucket_millis`, plus the per-bucket rates
    /// over the period when `include_tps_measurements` is set.
    pub fn max_hits_per_duration(
        &self,
        bucket_millis: i64,
        include_tps_measurements: bool,
    ) -> Result<TransactionCounterResult> {
        window::check_bucket(bucket_millis)?;
        let cache_key = (bucket_millis, include_tps_measurements);
        let mut cache = self.cache.lock();
        if let Some(result) = cache.rates.get(&cache_key) {
            debug!(counter = %self.counter.key(), bucket_millis, "rate result from cache");
            return Ok(result.clone());
        }

        let (max_count, max_count_timestamp) =
            window::max_hits_in_window(self.counter.samples()?, bucket_millis)?;
        let per_bucket_rate = match (include_tps_measurements, self.period.bounds()) {
            (true, Some(bounds)) => window::bucket_rates(
                self.counter.samples()?,
                bounds,
                bucket_millis,
                max_count_timestamp,
            )?,
            _ => Vec::new(),
        };
        let result = TransactionCounterResult {
            per_bucket_rate,
            max_count,
            bucket_duration_millis: bucket_millis,
            max_count_timestamp,
        };
        cache.rates.put(cache_key, result.clone());
        Ok(result)
    }

    pub fn max_concurrent_requests(&self) -> Result<ConcurrentCounterResult> {
        let mut cache = self.cache.lock();
        if let Some(result) = cache.concurrency {
            return Ok(result);
        }
        let result = window::max_concurrent_requests(self.counter.samples()?)?;
        cache.concurrency = Some(result);
        Ok(result)
    }
}
