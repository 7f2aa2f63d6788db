//! Named time series and the bounded registry that owns them.

pub mod key;
pub mod store;

use std::borrow::Cow;
use std::fmt;

use once_cell::sync::Lazy;

pub use key::{CounterKey, CounterKeyMetaData};
pub use store::{CounterStore, CounterStorePair};

use crate::error::{Error, Result};
use crate::period::TimePeriod;
use crate::store::{check_timestamp, MemoryStore, Samples, TimeSeriesStore};

/// Shared stand-in for a counter that does not exist.
static EMPTY_COUNTER: Lazy<RequestCounter> = Lazy::new(|| {
    RequestCounter::new(CounterKey::of("EMPTY"), Box::new(MemoryStore::new())).frozen()
});

/// A named, time-ordered series of `(timestamp, duration)` samples.
///
/// Unless created with a fixed period, the period follows the data: it
/// starts at the smallest timestamp seen and ends one millisecond after the
/// largest.
pub struct RequestCounter {
    key: CounterKey,
    store: Box<dyn TimeSeriesStore>,
    fixed_period: bool,
    period: TimePeriod,
    read_only: bool,
}

impl RequestCounter {
    /// Writable counter whose period grows with the data.
    pub fn new(key: CounterKey, store: Box<dyn TimeSeriesStore>) -> Self {
        Self {
            key,
            store,
            fixed_period: false,
            period: TimePeriod::UNDEFINED,
            read_only: false,
        }
    }

    /// Writable counter over a preset period that `inc_requests` leaves
    /// untouched.
    pub fn with_fixed_period(
        key: CounterKey,
        store: Box<dyn TimeSeriesStore>,
        period: TimePeriod,
    ) -> Self {
        Self {
            key,
            store,
            fixed_period: true,
            period,
            read_only: false,
        }
    }

    /// Writable in-memory counter.
    pub fn in_memory(key: CounterKey) -> Self {
        Self::new(key, Box::new(MemoryStore::new()))
    }

    /// The shared empty, read-only counter.
    pub fn empty() -> &'static RequestCounter {
        &EMPTY_COUNTER
    }

    /// Reject all further mutation.
    pub fn frozen(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    pub fn period(&self) -> TimePeriod {
        self.period
    }

    pub fn has_fixed_period(&self) -> bool {
        self.fixed_period
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn hits(&self) -> Result<u64> {
        self.store.size()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    pub fn samples(&self) -> Result<Samples<'_>> {
        self.store.samples()
    }

    /// Record one request.
    pub fn inc_requests(&mut self, timestamp: i64, duration_millis: i32) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly {
                name: self.key.name().to_string(),
            });
        }
        check_timestamp(timestamp)?;
        self.store.add(timestamp, duration_millis)?;
        if !self.fixed_period {
            self.period = match self.period.bounds() {
                None => TimePeriod::exclusive(timestamp, timestamp + 1)?,
                Some((start, end)) => {
                    TimePeriod::exclusive(start.min(timestamp), end.max(timestamp + 1))?
                }
            };
        }
        Ok(())
    }

    /// Read-only counter over the part of this one inside `period`, sharing
    /// the same backing data.
    pub fn time_sliced_counter(&self, period: &TimePeriod) -> Result<RequestCounter> {
        period.require_bounds("slicing a counter")?;
        Ok(RequestCounter {
            key: self.key.clone(),
            store: self.store.time_slice(period)?,
            fixed_period: true,
            period: *period,
            read_only: true,
        })
    }

    /// Slice `counter` to `period` only when needed. A missing counter
    /// becomes the shared empty counter, and a counter that already lies
    /// inside `period` (or an undefined `period`) is borrowed as is.
    ///
    /// A fixed period says nothing about the samples actually added, so
    /// fixed-period counters are always sliced to the overlap of their own
    /// period and `period`.
    pub fn safe_sliced_counter<'a>(
        counter: Option<&'a RequestCounter>,
        period: &TimePeriod,
    ) -> Result<Cow<'a, RequestCounter>> {
        let Some(counter) = counter else {
            return Ok(Cow::Borrowed(Self::empty()));
        };
        if counter.fixed_period {
            let Some((mut start, mut end)) = counter.period.bounds() else {
                return Ok(Cow::Borrowed(counter));
            };
            if let Some((outer_start, outer_end)) = period.bounds() {
                start = start.max(outer_start);
                end = end.min(outer_end).max(start);
            }
            let overlap = TimePeriod::exclusive(start, end)?;
            return Ok(Cow::Owned(counter.time_sliced_counter(&overlap)?));
        }
        if !period.is_defined() || !counter.period.is_defined() || period.covers(&counter.period) {
            return Ok(Cow::Borrowed(counter));
        }
        Ok(Cow::Owned(counter.time_sliced_counter(period)?))
    }

    /// New frozen in-memory counter holding the samples of both inputs,
    /// restricted to `period` when it is defined.
    pub fn merged(
        key: CounterKey,
        first: &RequestCounter,
        second: &RequestCounter,
        period: &TimePeriod,
    ) -> Result<RequestCounter> {
        let mut merged = if period.is_defined() {
            Self::with_fixed_period(key, Box::new(MemoryStore::new()), *period)
        } else {
            Self::in_memory(key)
        };
        for source in [first, second] {
            let source = Self::safe_sliced_counter(Some(source), period)?;
            for sample in source.samples()? {
                let sample = sample?;
                merged.inc_requests(sample.timestamp, sample.duration_millis)?;
            }
        }
        Ok(merged.frozen())
    }
}

/// A second handle onto the same samples; writability is preserved.
impl Clone for RequestCounter {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: self.store.duplicate(),
            fixed_period: self.fixed_period,
            period: self.period,
            read_only: self.read_only,
        }
    }
}

impl fmt::Debug for RequestCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCounter")
            .field("key", &self.key.name())
            .field("period", &self.period)
            .field("fixed_period", &self.fixed_period)
            .field("read_only", &self.read_only)
            .field("store", &self.store)
            .finish()
    }
}
