//! The same ordering and slicing contract, checked against every backend.
//!
//! Redis cases need a running server (`RTSTAT_REDIS_URL`, default
//! `redis://127.0.0.1:6379/`) and are ignored by default.

use proptest::prelude::*;

use rtstat::config::{StorageConfig, StorageKind};
use rtstat::store::{MemoryStore, SpillStore};
use rtstat::{Error, StoreFactory, TimePeriod, TimeSeriesStore};

const INPUT: &[(i64, i32)] = &[
    (300, 1),
    (100, 2),
    (200, 3),
    (100, 4),
    (500, 5),
    (400, 6),
    (200, 7),
    (0, 8),
];

fn fill(store: &mut dyn TimeSeriesStore, samples: &[(i64, i32)]) {
    for &(ts, d) in samples {
        store.add(ts, d).unwrap();
    }
}

fn contents(store: &dyn TimeSeriesStore) -> Vec<(i64, i32)> {
    store
        .samples()
        .unwrap()
        .map(|m| {
            let m = m.unwrap();
            (m.timestamp, m.duration_millis)
        })
        .collect()
}

/// Stable sort of the input: what every backend must yield.
fn expected(samples: &[(i64, i32)]) -> Vec<(i64, i32)> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|&(ts, _)| ts);
    sorted
}

fn spill_store() -> Box<dyn TimeSeriesStore> {
    Box::new(SpillStore::new(None, 3))
}

fn memory_store() -> Box<dyn TimeSeriesStore> {
    Box::new(MemoryStore::new())
}

fn redis_store() -> Box<dyn TimeSeriesStore> {
    let config = StorageConfig {
        kind: StorageKind::Redis,
        redis_url: std::env::var("RTSTAT_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/".into()),
        redis_key_prefix: "rtstat-test".into(),
        ..StorageConfig::default()
    };
    StoreFactory::new(config).unwrap().create().unwrap()
}

macro_rules! conformance {
    ($backend:ident, $make:expr $(, #[$attr:meta])*) => {
        mod $backend {
            use super::*;

            $(#[$attr])*
            #[test]
            fn iterates_ascending_with_ties_in_insertion_order() {
                let mut store = $make;
                fill(store.as_mut(), INPUT);
                assert_eq!(contents(store.as_ref()), expected(INPUT));
            }

            $(#[$attr])*
            #[test]
            fn iteration_restarts() {
                let mut store = $make;
                fill(store.as_mut(), INPUT);
                assert_eq!(contents(store.as_ref()), contents(store.as_ref()));
            }

            $(#[$attr])*
            #[test]
            fn size_and_emptiness() {
                let mut store = $make;
                assert!(store.is_empty().unwrap());
                fill(store.as_mut(), INPUT);
                assert_eq!(store.size().unwrap(), INPUT.len() as u64);
                assert!(!store.is_empty().unwrap());
            }

            $(#[$attr])*
            #[test]
            fn slice_is_half_open() {
                let mut store = $make;
                fill(store.as_mut(), INPUT);
                let slice = store
                    .time_slice(&TimePeriod::exclusive(100, 300).unwrap())
                    .unwrap();
                assert_eq!(
                    contents(slice.as_ref()),
                    vec![(100, 2), (100, 4), (200, 3), (200, 7)]
                );
                assert_eq!(slice.size().unwrap(), 4);
            }

            $(#[$attr])*
            #[test]
            fn slice_is_read_only_and_needs_bounds() {
                let mut store = $make;
                fill(store.as_mut(), INPUT);
                let mut slice = store
                    .time_slice(&TimePeriod::exclusive(0, 1_000).unwrap())
                    .unwrap();
                assert!(matches!(slice.add(10, 1), Err(Error::ReadOnly { .. })));
                assert!(matches!(
                    store.time_slice(&TimePeriod::UNDEFINED),
                    Err(Error::UndefinedPeriod { .. })
                ));
            }

            $(#[$attr])*
            #[test]
            fn negative_timestamp_is_rejected() {
                let mut store = $make;
                assert!(matches!(
                    store.add(-1, 5),
                    Err(Error::NegativeTimestamp { timestamp: -1 })
                ));
                assert!(store.is_empty().unwrap());
            }

            $(#[$attr])*
            #[test]
            fn many_samples_stay_ordered() {
                let mut store = $make;
                let input: Vec<(i64, i32)> = (0..2_500)
                    .map(|i| ((i * 7_919) % 1_000, i as i32))
                    .collect();
                fill(store.as_mut(), &input);
                assert_eq!(store.size().unwrap(), input.len() as u64);
                assert_eq!(contents(store.as_ref()), expected(&input));
            }

            $(#[$attr])*
            #[test]
            fn duplicate_sees_later_writes() {
                let mut store = $make;
                let copy = store.duplicate();
                fill(store.as_mut(), INPUT);
                assert_eq!(contents(copy.as_ref()), expected(INPUT));
            }
        }
    };
}

conformance!(memory, memory_store());
conformance!(spill, spill_store());
conformance!(redis, redis_store(), #[ignore = "needs a redis server"]);

proptest! {
    #[test]
    fn backends_agree_on_arbitrary_input(
        samples in prop::collection::vec((0i64..5_000, 0i32..10_000), 0..200)
    ) {
        let mut memory = memory_store();
        let mut spill = spill_store();
        fill(memory.as_mut(), &samples);
        fill(spill.as_mut(), &samples);

        let from_memory = contents(memory.as_ref());
        prop_assert_eq!(&from_memory, &expected(&samples));
        prop_assert_eq!(&from_memory, &contents(spill.as_ref()));
    }

    #[test]
    fn slices_agree_on_arbitrary_input(
        samples in prop::collection::vec((0i64..5_000, 0i32..100), 0..200),
        start in 0i64..5_000,
        len in 0i64..5_000,
    ) {
        let period = TimePeriod::exclusive(start, start + len).unwrap();
        let mut memory = memory_store();
        let mut spill = spill_store();
        fill(memory.as_mut(), &samples);
        fill(spill.as_mut(), &samples);

        let want: Vec<(i64, i32)> = expected(&samples)
            .into_iter()
            .filter(|&(ts, _)| period.contains(ts))
            .collect();
        prop_assert_eq!(&contents(memory.time_slice(&period).unwrap().as_ref()), &want);
        prop_assert_eq!(&contents(spill.time_slice(&period).unwrap().as_ref()), &want);
    }
}
