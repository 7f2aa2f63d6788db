//! End-to-end behaviour of counters, the registry and the analyser.

use proptest::prelude::*;

use rtstat::counter::store::OVERFLOW_COUNTER_NAME;
use rtstat::{
    AnalyserFactory, CounterKey, CounterKeyMetaData, CounterStore, CounterStorePair, RequestCounter,
    ResponseTimeAnalyser, StatisticsEngine, StoreFactory, TimePeriod,
};

fn counter(samples: &[(i64, i32)]) -> RequestCounter {
    let mut counter = RequestCounter::in_memory(CounterKey::of("GET /"));
    for &(ts, d) in samples {
        counter.inc_requests(ts, d).unwrap();
    }
    counter
}

#[test]
fn overflow_with_cap_of_one() {
    let mut store = CounterStore::new("success", StoreFactory::memory(), 1);
    for (i, name) in ["key1", "key2", "key3"].iter().enumerate() {
        store.add(&CounterKey::of(*name), i as i64, 10).unwrap();
    }
    assert_eq!(store.len(), 2);
    assert!(store.counter(&CounterKey::of("key1")).is_some());
    let overflow = store.counter(&CounterKey::of(OVERFLOW_COUNTER_NAME)).unwrap();
    assert_eq!(overflow.hits().unwrap(), 2);
    assert_eq!(store.total_hits().unwrap(), 3);
}

#[test]
fn max_hit_rate_scenario() {
    let c = counter(&[(0, 1), (500, 1), (1_000, 1), (1_500, 1)]);
    let analyser = ResponseTimeAnalyser::new(&c, &TimePeriod::UNDEFINED).unwrap();
    let result = analyser.max_hits_per_duration(1_000, false).unwrap();
    assert_eq!((result.max_count, result.max_count_timestamp), (2, 0));
}

#[test]
fn max_concurrency_scenario() {
    let c = counter(&[(0, 100), (50, 100), (200, 50)]);
    let analyser = ResponseTimeAnalyser::new(&c, &TimePeriod::UNDEFINED).unwrap();
    let result = analyser.max_concurrent_requests().unwrap();
    assert_eq!((result.max_concurrent, result.max_concurrent_timestamp), (2, 100));
}

#[test]
fn failure_percentage_scenario() {
    let mut pair = CounterStorePair::new(StoreFactory::memory(), 10);
    let key = CounterKey::of("POST /login");
    for ts in [0, 1_000, 2_000] {
        pair.add(&key, ts, 20, true).unwrap();
    }
    pair.add(&key, 1_500, 900, false).unwrap();

    let analyser = AnalyserFactory::new(true, false)
        .create(
            pair.success().counter(&key).unwrap(),
            pair.failure_counter(&key),
            &TimePeriod::UNDEFINED,
        )
        .unwrap();
    assert_eq!(analyser.total_hits().unwrap(), 3);
    assert_eq!(analyser.failure_percentage().unwrap(), 25.0);
    // failures stay out of the duration statistics
    assert_eq!(analyser.max().unwrap(), 20);
}

#[test]
fn metadata_merge_scenario() {
    let a = CounterKeyMetaData::new(vec!["a".into()], vec!["x".into()]).unwrap();
    let b = CounterKeyMetaData::new(vec!["a".into()], vec!["y".into()]).unwrap();
    assert_eq!(a.merge(&b).value("a"), Some("x+y"));
}

#[test]
fn slicing_to_own_period_is_equivalent() {
    let c = counter(&[(100, 30), (250, 10), (900, 70), (901, 20)]);
    let sliced = c.time_sliced_counter(&c.period()).unwrap();
    assert_eq!(sliced.hits().unwrap(), c.hits().unwrap());

    let original = ResponseTimeAnalyser::new(&c, &TimePeriod::UNDEFINED).unwrap();
    let copy = ResponseTimeAnalyser::new(&sliced, &TimePeriod::UNDEFINED).unwrap();
    assert_eq!(original.min().unwrap(), copy.min().unwrap());
    assert_eq!(original.max().unwrap(), copy.max().unwrap());
    assert_eq!(
        original.avg_hit_duration().unwrap(),
        copy.avg_hit_duration().unwrap()
    );
}

#[test]
fn generated_stream_end_to_end() {
    use rtstat::generator::{generate, LoadProfile};
    use rtstat::ResponseTimeSummary;

    let mut pair = CounterStorePair::new(StoreFactory::memory(), 3);
    let profile = LoadProfile {
        requests: 2_000,
        start: 1_000_000,
        mean_gap_millis: 10,
        seed: 3,
    };
    for r in generate(profile) {
        pair.add(&r.key, r.timestamp, r.duration_millis, r.success).unwrap();
    }
    assert!(pair.success().is_overflowing());
    assert_eq!(pair.success().len(), 4);

    let total = pair.success().total_hits().unwrap() + pair.failure().total_hits().unwrap();
    assert_eq!(total, 2_000);

    let factory = AnalyserFactory::new(true, true);
    let mut summed = 0;
    for key in pair.keys() {
        let success = pair.success().counter(&key).unwrap_or(RequestCounter::empty());
        let analyser = factory
            .create(success, pair.failure_counter(&key), &TimePeriod::UNDEFINED)
            .unwrap();
        let summary = ResponseTimeSummary::from_analyser(&analyser, &[50.0, 99.0], total).unwrap();
        assert!(summary.percentiles[0].duration_millis <= summary.percentiles[1].duration_millis);
        summed += summary.hits;
    }
    assert_eq!(summed, total);
}

proptest! {
    #[test]
    fn percentiles_are_monotonic(
        durations in prop::collection::vec(0i32..200_000, 1..300),
        p1 in 0.0f64..=100.0,
        p2 in 0.0f64..=100.0,
    ) {
        let samples: Vec<(i64, i32)> =
            durations.iter().enumerate().map(|(i, &d)| (i as i64, d)).collect();
        let c = counter(&samples);
        let engine = StatisticsEngine::new(&c, &c.period()).unwrap();
        let (low, high) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        prop_assert!(engine.percentile(low).unwrap() <= engine.percentile(high).unwrap());
        let max = i64::from(*durations.iter().max().unwrap());
        prop_assert_eq!(engine.percentile(100.0).unwrap(), max);
    }

    #[test]
    fn full_histogram_counts_every_sample(
        durations in prop::collection::vec(0i32..50_000, 1..300),
        ranges in 1i32..40,
    ) {
        let samples: Vec<(i64, i32)> =
            durations.iter().enumerate().map(|(i, &d)| (i as i64 * 3, d)).collect();
        let c = counter(&samples);
        let analyser = ResponseTimeAnalyser::new(&c, &TimePeriod::UNDEFINED).unwrap();
        let histogram = analyser.histogram(ranges, 0.0, 100.0).unwrap();
        let total = analyser.total_hits().unwrap() as f64;
        prop_assert!((histogram.total_count() - total).abs() < 1e-6);
    }

    #[test]
    fn window_maximum_never_exceeds_hits(
        gaps in prop::collection::vec(0i64..2_000, 1..200),
        bucket in 1i64..10_000,
    ) {
        let mut ts = 0;
        let samples: Vec<(i64, i32)> = gaps.iter().map(|g| { ts += g; (ts, 5) }).collect();
        let c = counter(&samples);
        let analyser = ResponseTimeAnalyser::new(&c, &TimePeriod::UNDEFINED).unwrap();
        let result = analyser.max_hits_per_duration(bucket, true).unwrap();
        prop_assert!(result.max_count >= 1);
        prop_assert!(result.max_count <= samples.len() as u64);
        let rated: f64 = result
            .per_bucket_rate
            .iter()
            .map(|r| r.rate * bucket as f64 / 1_000.0)
            .sum();
        prop_assert!(rated <= samples.len() as f64 + 1e-6);
    }
}
