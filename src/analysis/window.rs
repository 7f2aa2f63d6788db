//! Single-pass window algorithms over ascending samples.
//!
//! All three expect their input in ascending timestamp order, which every
//! store guarantees, and look at each sample once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::TimeMeasurement;

// ─── Result types ────────────────────────────────────────────────

/// Average rate over one fixed bucket, in hits per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatePoint {
    /// Start of the bucket.
    pub timestamp: i64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionCounterResult {
    /// Empty unless the per-bucket rates were requested.
    pub per_bucket_rate: Vec<RatePoint>,
    pub max_count: u64,
    pub bucket_duration_millis: i64,
    /// Oldest sample still inside the busiest window.
    pub max_count_timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrentCounterResult {
    pub max_concurrent: u64,
    /// Earliest pending end time when the maximum was reached. This is the
    /// end of a request, not the start of one.
    pub max_concurrent_timestamp: i64,
}

pub(crate) fn check_bucket(bucket_millis: i64) -> Result<()> {
    if bucket_millis <= 0 {
        return Err(Error::NonPositiveDuration {
            what: "bucket",
            millis: bucket_millis,
        });
    }
    Ok(())
}

// ─── Maximum hits in a trailing window ───────────────────────────

/// Largest number of samples inside any trailing window of
/// `bucket_millis`, with the timestamp of the oldest sample in that window.
///
/// A sample exactly `bucket_millis` older than the newest one has left the
/// window.
pub fn max_hits_in_window<I>(samples: I, bucket_millis: i64) -> Result<(u64, i64)>
where
    I: IntoIterator<Item = Result<TimeMeasurement>>,
{
    check_bucket(bucket_millis)?;
    let mut window: VecDeque<i64> = VecDeque::new();
    let mut max_count = 0u64;
    let mut max_timestamp = 0i64;

    for sample in samples {
        let timestamp = sample?.timestamp;
        window.push_back(timestamp);
        let horizon = timestamp - bucket_millis;
        while window.front().is_some_and(|&oldest| oldest <= horizon) {
            window.pop_front();
        }
        if window.len() as u64 > max_count {
            max_count = window.len() as u64;
            if let Some(&oldest) = window.front() {
                max_timestamp = oldest;
            }
        }
    }
    Ok((max_count, max_timestamp.max(0)))
}

// ─── Rate per fixed bucket ───────────────────────────────────────

/// Hits per second in consecutive `bucket_millis` buckets over
/// `[start, end)`.
///
/// Bucket edges are phased so that one bucket starts exactly at
/// `anchor` (normally the busiest-window timestamp), and the first edge
/// lies at or before `start`. Only buckets whose midpoint lies strictly
/// inside the period are reported.
pub fn bucket_rates<I>(
    samples: I,
    (start, end): (i64, i64),
    bucket_millis: i64,
    anchor: i64,
) -> Result<Vec<RatePoint>>
where
    I: IntoIterator<Item = Result<TimeMeasurement>>,
{
    check_bucket(bucket_millis)?;
    let mut offset = anchor.rem_euclid(bucket_millis) - start.rem_euclid(bucket_millis);
    if offset > 0 {
        offset -= bucket_millis;
    }
    let bucket_seconds = bucket_millis as f64 / 1000.0;
    let half = bucket_millis / 2;

    let mut rates = Vec::new();
    let mut emit = |bucket_start: i64, count: u64| {
        let mid = bucket_start + half;
        if mid > start && mid < end {
            rates.push(RatePoint {
                timestamp: bucket_start,
                rate: count as f64 / bucket_seconds,
            });
        }
    };

    let mut bucket_start = start + offset;
    let mut count = 0u64;
    for sample in samples {
        let timestamp = sample?.timestamp;
        if timestamp < start || timestamp >= end {
            continue;
        }
        while timestamp >= bucket_start + bucket_millis {
            emit(bucket_start, count);
            count = 0;
            bucket_start += bucket_millis;
        }
        count += 1;
    }
    while bucket_start < end {
        emit(bucket_start, count);
        count = 0;
        bucket_start += bucket_millis;
    }
    Ok(rates)
}

// ─── Maximum concurrency ─────────────────────────────────────────

/// Sweep over request start times keeping a min-heap of pending end times.
/// A request whose end time is at or before the current start no longer
/// counts as in flight.
pub fn max_concurrent_requests<I>(samples: I) -> Result<ConcurrentCounterResult>
where
    I: IntoIterator<Item = Result<TimeMeasurement>>,
{
    let mut pending: BinaryHeap<Reverse<i64>> = BinaryHeap::new();
    let mut result = ConcurrentCounterResult {
        max_concurrent: 0,
        max_concurrent_timestamp: 0,
    };

    for sample in samples {
        let sample = sample?;
        pending.push(Reverse(sample.end_time()));
        while pending
            .peek()
            .is_some_and(|Reverse(end)| *end <= sample.timestamp)
        {
            pending.pop();
        }
        if pending.len() as u64 > result.max_concurrent {
            result.max_concurrent = pending.len() as u64;
            if let Some(Reverse(end)) = pending.peek() {
                result.max_concurrent_timestamp = *end;
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(timestamps: &[i64]) -> Vec<Result<TimeMeasurement>> {
        timestamps
            .iter()
            .map(|&t| Ok(TimeMeasurement::new(t, 1)))
            .collect()
    }

    fn spans(samples: &[(i64, i32)]) -> Vec<Result<TimeMeasurement>> {
        samples
            .iter()
            .map(|&(t, d)| Ok(TimeMeasurement::new(t, d)))
            .collect()
    }

    #[test]
    fn boundary_sample_leaves_the_window() {
        let (count, ts) = max_hits_in_window(at(&[0, 500, 1_000, 1_500]), 1_000).unwrap();
        assert_eq!((count, ts), (2, 0));
    }

    #[test]
    fn window_anchor_is_oldest_sample_in_window() {
        let (count, ts) = max_hits_in_window(at(&[0, 5_000, 5_100, 5_200, 9_000]), 1_000).unwrap();
        assert_eq!((count, ts), (3, 5_000));
    }

    #[test]
    fn empty_input_has_no_hits() {
        assert_eq!(max_hits_in_window(at(&[]), 1_000).unwrap(), (0, 0));
        assert_eq!(max_concurrent_requests(spans(&[])).unwrap().max_concurrent, 0);
    }

    #[test]
    fn non_positive_bucket_is_rejected() {
        assert!(matches!(
            max_hits_in_window(at(&[1]), 0),
            Err(Error::NonPositiveDuration { .. })
        ));
        assert!(bucket_rates(at(&[1]), (0, 10), -5, 0).is_err());
    }

    #[test]
    fn rates_are_phased_on_the_anchor() {
        let samples = at(&[1_200, 1_300, 2_100, 3_900]);
        let rates = bucket_rates(samples, (1_000, 4_000), 1_000, 1_200).unwrap();
        let starts: Vec<i64> = rates.iter().map(|r| r.timestamp).collect();
        // Edges at ...200; the bucket at 200 has its midpoint before start.
        assert_eq!(starts, vec![1_200, 2_200, 3_200]);
        let values: Vec<f64> = rates.iter().map(|r| r.rate).collect();
        assert_eq!(values, vec![3.0, 0.0, 1.0]);
    }

    #[test]
    fn rates_fill_empty_buckets() {
        let rates = bucket_rates(at(&[0, 500, 3_500]), (0, 4_000), 1_000, 0).unwrap();
        let values: Vec<f64> = rates.iter().map(|r| r.rate).collect();
        assert_eq!(values, vec![2.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn concurrency_records_pending_end_time() {
        let result = max_concurrent_requests(spans(&[(0, 100), (50, 100), (200, 50)])).unwrap();
        assert_eq!(
            result,
            ConcurrentCounterResult {
                max_concurrent: 2,
                max_concurrent_timestamp: 100,
            }
        );
    }

    #[test]
    fn request_ending_at_next_start_is_not_concurrent() {
        let result = max_concurrent_requests(spans(&[(0, 100), (100, 100), (200, 100)])).unwrap();
        assert_eq!(result.max_concurrent, 1);
    }
}
