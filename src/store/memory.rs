use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use super::{check_timestamp, read_only_view, Samples, TimeMeasurement, TimeSeriesStore};
use crate::error::Result;
use crate::period::TimePeriod;

/// Sorted in-memory vector shared between a store and its slices.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    samples: Arc<RwLock<Vec<TimeMeasurement>>>,
    /// `Some` for slice views, which are read-only.
    window: Option<(i64, i64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index range of the visible samples in the sorted vector.
    fn visible(&self, samples: &[TimeMeasurement]) -> (usize, usize) {
        match self.window {
            None => (0, samples.len()),
            Some((start, end)) => (
                samples.partition_point(|m| m.timestamp < start),
                samples.partition_point(|m| m.timestamp < end),
            ),
        }
    }
}

impl TimeSeriesStore for MemoryStore {
    fn add(&mut self, timestamp: i64, duration_millis: i32) -> Result<()> {
        check_timestamp(timestamp)?;
        if self.window.is_some() {
            return Err(read_only_view());
        }
        let mut samples = self.samples.write();
        let sample = TimeMeasurement::new(timestamp, duration_millis);
        let late = samples.last().is_some_and(|last| last.timestamp > timestamp);
        if late {
            // Land after every equal timestamp.
            let at = samples.partition_point(|m| m.timestamp <= timestamp);
            samples.insert(at, sample);
        } else {
            samples.push(sample);
        }
        Ok(())
    }

    fn samples(&self) -> Result<Samples<'_>> {
        let guard = self.samples.read();
        let (pos, end) = self.visible(&guard);
        Ok(Box::new(MemoryIter { guard, pos, end }))
    }

    fn size(&self) -> Result<u64> {
        let guard = self.samples.read();
        let (start, end) = self.visible(&guard);
        Ok((end - start) as u64)
    }

    fn time_slice(&self, period: &TimePeriod) -> Result<Box<dyn TimeSeriesStore>> {
        let (mut start, mut end) = period.require_bounds("time slice")?;
        if let Some((outer_start, outer_end)) = self.window {
            start = start.max(outer_start);
            end = end.min(outer_end).max(start);
        }
        Ok(Box::new(MemoryStore {
            samples: Arc::clone(&self.samples),
            window: Some((start, end)),
        }))
    }

    fn duplicate(&self) -> Box<dyn TimeSeriesStore> {
        Box::new(self.clone())
    }
}

/// Holds the read lock for the whole iteration.
struct MemoryIter<'a> {
    guard: RwLockReadGuard<'a, Vec<TimeMeasurement>>,
    pos: usize,
    end: usize,
}

impl Iterator for MemoryIter<'_> {
    type Item = Result<TimeMeasurement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let sample = self.guard[self.pos];
        self.pos += 1;
        Some(Ok(sample))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end.saturating_sub(self.pos);
        (left, Some(left))
    }
}
