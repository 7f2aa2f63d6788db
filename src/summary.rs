use serde::Serialize;

use crate::analysis::ResponseTimeAnalyser;
use crate::error::Result;

/// Histogram bars in a summary.
const SUMMARY_HISTOGRAM_RANGES: i32 = 10;

/// One requested percentile and its duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub duration_millis: i64,
}

/// A complete per-counter breakdown, ready to be serialized by a report
/// renderer.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeSummary {
    pub counter: String,
    pub period: String,
    pub hits: u64,
    pub failed_hits: u64,
    pub failure_percentage: f64,
    pub percentage_of_total: f64,

    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub std_dev: f64,
    pub percentiles: Vec<PercentileValue>,

    pub avg_tps: f64,
    pub max_tps: u64,
    pub max_tps_timestamp: i64,
    pub max_tpm: u64,
    pub max_tpm_timestamp: i64,
    pub max_concurrent: u64,
    pub max_concurrent_timestamp: i64,

    pub histogram: Vec<(f64, f64)>,
}

impl ResponseTimeSummary {
    /// Pull every reported value out of an analyser. Empty counters produce
    /// an all-zero summary.
    pub fn from_analyser(
        analyser: &ResponseTimeAnalyser,
        report_percentiles: &[f64],
        overall_total_hits: u64,
    ) -> Result<Self> {
        let tps = analyser.max_hits_per_duration(1_000, false)?;
        let tpm = analyser.max_hits_per_duration(60_000, false)?;
        let concurrency = analyser.max_concurrent_requests()?;
        let percentiles = report_percentiles
            .iter()
            .map(|&percentile| {
                Ok(PercentileValue {
                    percentile,
                    duration_millis: analyser.percentile(percentile)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let histogram = analyser
            .histogram_for_relevant_values(SUMMARY_HISTOGRAM_RANGES)?
            .buckets
            .iter()
            .map(|b| (b.upper_bound, b.count))
            .collect();

        Ok(Self {
            counter: analyser.counter_key().name().to_string(),
            period: analyser.period().to_string(),
            hits: analyser.total_hits()?,
            failed_hits: analyser.failed_hits(),
            failure_percentage: analyser.failure_percentage()?,
            percentage_of_total: analyser.percentage(overall_total_hits)?,
            min: analyser.min()?,
            max: analyser.max()?,
            mean: analyser.avg_hit_duration()?,
            std_dev: analyser.std_dev_hit_duration()?,
            percentiles,
            avg_tps: analyser.avg_tps()?,
            max_tps: tps.max_count,
            max_tps_timestamp: tps.max_count_timestamp,
            max_tpm: tpm.max_count,
            max_tpm_timestamp: tpm.max_count_timestamp,
            max_concurrent: concurrency.max_concurrent,
            max_concurrent_timestamp: concurrency.max_concurrent_timestamp,
            histogram,
        })
    }

    /// Convenience: is this summary backed by at least one observation?
    pub fn has_data(&self) -> bool {
        self.hits > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterKey, RequestCounter};
    use crate::period::TimePeriod;

    #[test]
    fn summary_reads_all_metrics() {
        let mut counter = RequestCounter::in_memory(CounterKey::of("GET /api/users/:id"));
        for i in 0..100 {
            counter.inc_requests(i * 100, (i % 10 + 1) as i32 * 10).unwrap();
        }
        let analyser = ResponseTimeAnalyser::new(&counter, &TimePeriod::UNDEFINED).unwrap();
        let summary = ResponseTimeSummary::from_analyser(&analyser, &[50.0, 99.0], 200).unwrap();

        assert!(summary.has_data());
        assert_eq!(summary.hits, 100);
        assert!((summary.percentage_of_total - 50.0).abs() < 1e-9);
        assert_eq!(summary.min, 10);
        assert_eq!(summary.max, 100);
        assert_eq!(summary.percentiles[0].duration_millis, 50);
        assert_eq!(summary.max_tps, 10);
        assert_eq!(summary.max_tpm, 100);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["counter"], "GET /api/users/:id");
    }

    #[test]
    fn empty_counter_gives_zero_summary() {
        let counter = RequestCounter::in_memory(CounterKey::of("idle"));
        let analyser = ResponseTimeAnalyser::new(&counter, &TimePeriod::UNDEFINED).unwrap();
        let summary = ResponseTimeSummary::from_analyser(&analyser, &[95.0], 0).unwrap();
        assert!(!summary.has_data());
        assert_eq!(summary.percentiles[0].duration_millis, 0);
        assert!(summary.histogram.is_empty());
    }
}
