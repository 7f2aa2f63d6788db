//! Append-only, timestamp-ordered sample storage.
//!
//! Every backend keeps the same contract: iteration is ascending by
//! timestamp with ties in insertion order, and a time slice is a read-only
//! view over `[start, end)` of the same data.

pub mod database;
pub mod memory;
pub mod spill;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{StorageConfig, StorageKind};
use crate::error::{Error, Result};
use crate::period::TimePeriod;

pub use database::RedisStore;
pub use memory::MemoryStore;
pub use spill::SpillStore;

// ─── Sample ──────────────────────────────────────────────────────

/// One observed request: when it started and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeMeasurement {
    pub timestamp: i64,
    pub duration_millis: i32,
}

impl TimeMeasurement {
    pub fn new(timestamp: i64, duration_millis: i32) -> Self {
        Self {
            timestamp,
            duration_millis,
        }
    }

    /// Moment the request finished.
    pub fn end_time(&self) -> i64 {
        self.timestamp + i64::from(self.duration_millis)
    }
}

/// Fallible, ascending iteration over a store. Any resources the iterator
/// holds (locks, file handles, connections) are released on drop.
pub type Samples<'a> = Box<dyn Iterator<Item = Result<TimeMeasurement>> + 'a>;

// ─── Contract ────────────────────────────────────────────────────

pub trait TimeSeriesStore: fmt::Debug + Send + Sync {
    /// Append a sample. Negative timestamps are rejected.
    fn add(&mut self, timestamp: i64, duration_millis: i32) -> Result<()>;

    /// Iterate all samples in ascending timestamp order. Calling it again
    /// restarts from the beginning.
    fn samples(&self) -> Result<Samples<'_>>;

    /// Number of samples visible through this store.
    fn size(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Read-only view restricted to `[period.start, period.end)`.
    fn time_slice(&self, period: &TimePeriod) -> Result<Box<dyn TimeSeriesStore>>;

    /// A second handle onto the same data with the same writability.
    fn duplicate(&self) -> Box<dyn TimeSeriesStore>;
}

/// Reject the timestamps no backend accepts.
pub(crate) fn check_timestamp(timestamp: i64) -> Result<()> {
    if timestamp < 0 {
        return Err(Error::NegativeTimestamp { timestamp });
    }
    Ok(())
}

/// Error returned by `add` on slice views.
pub(crate) fn read_only_view() -> Error {
    Error::ReadOnly {
        name: "time slice".into(),
    }
}

// ─── Factory ─────────────────────────────────────────────────────

/// Builds empty stores of the configured kind.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    config: StorageConfig,
    redis: Option<redis::Client>,
}

impl StoreFactory {
    /// For the redis backend this validates the URL up front; connections
    /// are opened per store.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let redis = match config.kind {
            StorageKind::Redis => Some(redis::Client::open(config.redis_url.as_str())?),
            _ => None,
        };
        Ok(Self { config, redis })
    }

    /// Factory that only ever builds in-memory stores.
    pub fn memory() -> Self {
        Self {
            config: StorageConfig::default(),
            redis: None,
        }
    }

    pub fn kind(&self) -> StorageKind {
        self.config.kind
    }

    pub fn create(&self) -> Result<Box<dyn TimeSeriesStore>> {
        let store: Box<dyn TimeSeriesStore> = match (self.config.kind, &self.redis) {
            (StorageKind::Memory, _) => Box::new(MemoryStore::new()),
            (StorageKind::Spill, _) => Box::new(SpillStore::new(
                self.config.spill_dir.clone(),
                self.config.spill_threshold,
            )),
            (StorageKind::Redis, Some(client)) => {
                Box::new(RedisStore::connect(client, &self.config.redis_key_prefix)?)
            }
            (StorageKind::Redis, None) => {
                return Err(Error::Config("redis storage without a client".into()))
            }
        };
        Ok(store)
    }
}
