//! Windowed response-time statistics.
//!
//! A [`StatisticsEngine`] makes one pass over the samples of a counter that
//! fall inside a period. Durations go into an HdrHistogram (three
//! significant digits, resized as larger values show up) and running
//! moments; every later query is answered from those.

pub mod calculator;

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::warn;

use crate::counter::RequestCounter;
use crate::error::{Error, Result};
use crate::period::TimePeriod;

/// Relative error target of the histogram, in significant decimal digits.
const HIST_SIGFIG: u8 = 3;

/// Default outlier cutoffs for [`StatisticsEngine::histogram`].
pub const RELEVANT_MIN_PERCENTILE: f64 = 1.0;
pub const RELEVANT_MAX_PERCENTILE: f64 = 99.0;

// ─── Public types ────────────────────────────────────────────────

/// One histogram bar: samples with duration below `upper_bound` (and at or
/// above the previous bar's bound).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub upper_bound: f64,
    pub count: f64,
}

/// Duration distribution between two percentile cutoffs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramData {
    pub buckets: Vec<HistogramBucket>,
    pub bucket_width_millis: f64,
    /// Duration at the lower percentile cutoff.
    pub min_duration: i64,
    /// Duration at the upper percentile cutoff.
    pub max_duration: i64,
}

impl HistogramData {
    pub fn total_count(&self) -> f64 {
        self.buckets.iter().map(|b| b.count).sum()
    }
}

#[derive(Debug)]
pub struct StatisticsEngine {
    period: TimePeriod,
    histogram: Histogram<u64>,
    size: u64,
    min: i64,
    max: i64,
    mean: f64,
    /// Sum of squared distances from the mean (Welford).
    m2: f64,
}

// ─── Construction ────────────────────────────────────────────────

impl StatisticsEngine {
    /// Read every sample of `counter` inside `period` once.
    pub fn new(counter: &RequestCounter, period: &TimePeriod) -> Result<Self> {
        period.require_bounds("statistics")?;
        let mut engine = Self {
            period: *period,
            histogram: Histogram::new(HIST_SIGFIG).map_err(|e| Error::Histogram(e.to_string()))?,
            size: 0,
            min: 0,
            max: 0,
            mean: 0.0,
            m2: 0.0,
        };
        let counter = RequestCounter::safe_sliced_counter(Some(counter), period)?;
        for sample in counter.samples()? {
            engine.observe(i64::from(sample?.duration_millis))?;
        }
        Ok(engine)
    }

    fn observe(&mut self, duration: i64) -> Result<()> {
        if self.size == 0 {
            self.min = duration;
            self.max = duration;
        } else {
            self.min = self.min.min(duration);
            self.max = self.max.max(duration);
        }
        self.size += 1;
        let delta = duration as f64 - self.mean;
        self.mean += delta / self.size as f64;
        self.m2 += delta * (duration as f64 - self.mean);

        // The histogram only takes non-negative values.
        self.histogram
            .record(duration.max(0) as u64)
            .map_err(|e| Error::Histogram(e.to_string()))
    }
}

// ─── Queries ─────────────────────────────────────────────────────

impl StatisticsEngine {
    pub fn period(&self) -> TimePeriod {
        self.period
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            (self.m2 / self.size as f64).sqrt()
        }
    }

    /// Duration such that `percentile`% of the samples are at or below it.
    /// `percentile(100.0)` is always the exact maximum.
    pub fn percentile(&self, percentile: f64) -> Result<i64> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(Error::PercentileOutOfRange { percentile });
        }
        if self.size == 0 {
            return Ok(0);
        }
        let raw = self.histogram.value_at_quantile(percentile / 100.0);
        Ok(self.clamp(raw))
    }

    /// Whole-number variant of [`percentile`](Self::percentile) for
    /// `1..=100`.
    pub fn percentile_index(&self, percentile: i32) -> Result<i64> {
        if !(1..=100).contains(&percentile) {
            return Err(Error::PercentileOutOfRange {
                percentile: f64::from(percentile),
            });
        }
        self.percentile(f64::from(percentile))
    }

    /// Histogram values are bucket representatives; pull them back inside
    /// the observed range.
    fn clamp(&self, value: u64) -> i64 {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        value.clamp(self.min.max(0), self.max.max(0))
    }

    /// Bucket the samples between the `min_percentile` and `max_percentile`
    /// durations into about `ranges` bars. The bar width is rounded up to a
    /// 1/2/5×10ᵏ value and the first edge aligned to it, so bucket bounds
    /// are readable numbers. The last bar includes the upper cutoff.
    pub fn histogram(
        &self,
        ranges: i32,
        min_percentile: f64,
        max_percentile: f64,
    ) -> Result<HistogramData> {
        if ranges <= 0 {
            return Err(Error::InvalidHistogramRanges { ranges });
        }
        let valid = (0.0..=100.0).contains(&min_percentile)
            && (0.0..=100.0).contains(&max_percentile)
            && min_percentile <= max_percentile;
        if !valid {
            return Err(Error::InvalidHistogramPercentiles {
                min: min_percentile,
                max: max_percentile,
            });
        }

        let lower = self.percentile(min_percentile)?;
        let upper = self.percentile(max_percentile)?;
        if self.size == 0 {
            return Ok(HistogramData {
                buckets: Vec::new(),
                bucket_width_millis: 0.0,
                min_duration: lower,
                max_duration: upper,
            });
        }

        let raw_width = (upper - lower) as f64 / f64::from(ranges);
        let width = (calculator::closest_rounded_number_of_log10(raw_width).ceil() as i64).max(1);
        let edge_low = lower.div_euclid(width) * width;
        let bucket_count = ((upper - edge_low + width - 1) / width).max(1) as usize;

        let mut counts = vec![0u64; bucket_count];
        for value in self.histogram.iter_recorded() {
            let duration = self.clamp(value.value_iterated_to());
            if duration < lower || duration > upper {
                continue;
            }
            let index = ((duration - edge_low) / width) as usize;
            counts[index.min(bucket_count - 1)] += value.count_at_value();
        }

        if min_percentile == 0.0 && max_percentile == 100.0 {
            let counted: u64 = counts.iter().sum();
            if counted != self.size {
                warn!(
                    counted,
                    samples = self.size,
                    "histogram bucket counts do not add up to the sample count"
                );
            }
        }

        let buckets = counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBucket {
                upper_bound: (edge_low + (i as i64 + 1) * width) as f64,
                count: count as f64,
            })
            .collect();
        Ok(HistogramData {
            buckets,
            bucket_width_millis: width as f64,
            min_duration: lower,
            max_duration: upper,
        })
    }
}
