//! Deterministic synthetic request stream.
//!
//! Stands in for the log parsers: produces `(key, timestamp, duration,
//! success)` tuples with per-endpoint latency profiles so the engine can be
//! exercised end to end without real log files.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::counter::{CounterKey, CounterKeyMetaData};

// ─── Endpoint profiles ───────────────────────────────────────────

struct Endpoint {
    method: &'static str,
    path: &'static str,
    /// Share of the traffic, in arbitrary weight units
    weight: u32,
    base_millis: i32,
    jitter_millis: i32,
    failure_pct: u8,
}

static ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        method: "GET",
        path: "/api/users/:id",
        weight: 40,
        base_millis: 12,
        jitter_millis: 30,
        failure_pct: 1,
    },
    Endpoint {
        method: "GET",
        path: "/api/products/:id",
        weight: 30,
        base_millis: 8,
        jitter_millis: 20,
        failure_pct: 1,
    },
    Endpoint {
        method: "POST",
        path: "/api/sessions",
        weight: 15,
        base_millis: 40,
        jitter_millis: 120,
        failure_pct: 3,
    },
    Endpoint {
        method: "POST",
        path: "/api/users",
        weight: 10,
        base_millis: 60,
        jitter_millis: 200,
        failure_pct: 5,
    },
    Endpoint {
        method: "GET",
        path: "/api/reports/:id",
        weight: 5,
        base_millis: 400,
        jitter_millis: 2_500,
        failure_pct: 10,
    },
];

/// Odds that a request is slow regardless of its endpoint.
const SLOW_TAIL_PCT: u8 = 2;
const SLOW_TAIL_FACTOR: i32 = 8;

// ─── Public types ────────────────────────────────────────────────

/// One generated request, as a log parser would emit it.
#[derive(Debug, Clone)]
pub struct SyntheticRequest {
    pub key: CounterKey,
    pub timestamp: i64,
    pub duration_millis: i32,
    pub success: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadProfile {
    pub requests: u64,
    /// Epoch millis of the first request
    pub start: i64,
    /// Average gap between consecutive requests
    pub mean_gap_millis: i64,
    pub seed: u64,
}

/// Ascending stream of `profile.requests` synthetic requests.
pub fn generate(profile: LoadProfile) -> impl Iterator<Item = SyntheticRequest> {
    let mut rng = StdRng::seed_from_u64(profile.seed);
    let keys: Vec<CounterKey> = ENDPOINTS.iter().map(endpoint_key).collect();
    let total_weight: u32 = ENDPOINTS.iter().map(|e| e.weight).sum();
    let max_gap = (profile.mean_gap_millis.max(0) * 2).max(1);
    let mut timestamp = profile.start.max(0);

    (0..profile.requests).map(move |_| {
        let index = pick(&mut rng, total_weight);
        let endpoint = &ENDPOINTS[index];

        let mut duration = endpoint.base_millis + rng.gen_range(0..=endpoint.jitter_millis);
        if rng.gen_range(0u8..100) < SLOW_TAIL_PCT {
            duration *= SLOW_TAIL_FACTOR;
        }
        let success = rng.gen_range(0u8..100) >= endpoint.failure_pct;

        let request = SyntheticRequest {
            key: keys[index].clone(),
            timestamp,
            duration_millis: duration,
            success,
        };
        timestamp += rng.gen_range(0..=max_gap);
        request
    })
}

fn endpoint_key(endpoint: &Endpoint) -> CounterKey {
    let meta = CounterKeyMetaData::new(
        vec!["method".into(), "path".into()],
        vec![endpoint.method.into(), endpoint.path.into()],
    )
    .unwrap_or_default();
    CounterKey::new(format!("{} {}", endpoint.method, endpoint.path), meta)
}

/// Weighted endpoint index.
fn pick(rng: &mut StdRng, total_weight: u32) -> usize {
    let mut roll = rng.gen_range(0..total_weight.max(1));
    for (i, endpoint) in ENDPOINTS.iter().enumerate() {
        if roll < endpoint.weight {
            return i;
        }
        roll -= endpoint.weight;
    }
    ENDPOINTS.len() - 1
}
