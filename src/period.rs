//! Half-open millisecond intervals.

use std::fmt;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// A half-open `[start, end)` interval in epoch milliseconds.
///
/// Either both bounds are set or neither is; the latter is the "undefined"
/// period used by counters that have not seen a sample yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TimePeriod {
    start: Option<i64>,
    end: Option<i64>,
}

impl TimePeriod {
    /// Period with no bounds.
    pub const UNDEFINED: TimePeriod = TimePeriod {
        start: None,
        end: None,
    };

    /// Build a period from optional bounds. Exactly one bound set, or an end
    /// before the start, is an error.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Result<Self> {
        match (start, end) {
            (None, None) => Ok(Self::UNDEFINED),
            (Some(start), Some(end)) => Self::exclusive(start, end),
            _ => Err(Error::HalfDefinedPeriod),
        }
    }

    /// `[start, end)`: the given end timestamp is excluded.
    pub fn exclusive(start: i64, end: i64) -> Result<Self> {
        if end < start {
            return Err(Error::PeriodEndBeforeStart { start, end });
        }
        Ok(Self {
            start: Some(start),
            end: Some(end),
        })
    }

    /// `[start, last]`: the last timestamp is part of the period.
    pub fn inclusive(start: i64, last: i64) -> Result<Self> {
        if last < start {
            return Err(Error::PeriodEndBeforeStart { start, end: last });
        }
        Self::exclusive(start, last.saturating_add(1))
    }

    pub fn start(&self) -> Option<i64> {
        self.start
    }

    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Both bounds, or `None` for the undefined period.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.start.zip(self.end)
    }

    /// Bounds, or an `UndefinedPeriod` error naming the operation.
    pub fn require_bounds(&self, operation: &'static str) -> Result<(i64, i64)> {
        self.bounds().ok_or(Error::UndefinedPeriod { operation })
    }

    pub fn is_defined(&self) -> bool {
        self.start.is_some()
    }

    /// Length in milliseconds, zero when undefined.
    pub fn duration_millis(&self) -> i64 {
        self.bounds().map(|(s, e)| e - s).unwrap_or(0)
    }

    /// The smallest period covering both inputs, bound by bound. An
    /// undefined side does not widen the result.
    pub fn max_period(&self, other: &TimePeriod) -> TimePeriod {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        TimePeriod { start, end }
    }

    /// True if `timestamp` lies in `[start, end)`. The undefined period
    /// contains nothing.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.bounds()
            .map(|(s, e)| timestamp >= s && timestamp < e)
            .unwrap_or(false)
    }

    /// True if `other` lies completely inside this period.
    pub fn covers(&self, other: &TimePeriod) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((s, e)), Some((os, oe))) => os >= s && oe <= e,
            _ => false,
        }
    }

    /// True if the two periods share at least one millisecond.
    pub fn overlaps(&self, other: &TimePeriod) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((s, e)), Some((os, oe))) => os < e && s < oe,
            _ => false,
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bounds() {
            None => write!(f, "[undefined]"),
            Some((start, end)) => {
                let render = |ms: i64| match Utc.timestamp_millis_opt(ms).single() {
                    Some(t) => t.to_rfc3339(),
                    None => ms.to_string(),
                };
                write!(f, "[{}, {})", render(start), render(end))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_defined_is_rejected() {
        assert!(matches!(
            TimePeriod::new(Some(1), None),
            Err(Error::HalfDefinedPeriod)
        ));
        assert!(matches!(
            TimePeriod::new(None, Some(1)),
            Err(Error::HalfDefinedPeriod)
        ));
        assert_eq!(TimePeriod::new(None, None).unwrap(), TimePeriod::UNDEFINED);
    }

    #[test]
    fn end_before_start_is_rejected() {
        assert!(matches!(
            TimePeriod::exclusive(10, 5),
            Err(Error::PeriodEndBeforeStart { start: 10, end: 5 })
        ));
    }

    #[test]
    fn inclusive_adds_one_millisecond() {
        let p = TimePeriod::inclusive(100, 200).unwrap();
        assert_eq!(p.bounds(), Some((100, 201)));
        assert!(p.contains(200));
        assert!(!TimePeriod::exclusive(100, 200).unwrap().contains(200));
    }

    #[test]
    fn max_period_is_taken_per_bound() {
        let a = TimePeriod::exclusive(10, 20).unwrap();
        let b = TimePeriod::exclusive(5, 15).unwrap();
        assert_eq!(a.max_period(&b).bounds(), Some((5, 20)));
        assert_eq!(a.max_period(&TimePeriod::UNDEFINED), a);
        assert_eq!(TimePeriod::UNDEFINED.max_period(&b), b);
    }

    #[test]
    fn covers_and_overlaps() {
        let outer = TimePeriod::exclusive(0, 100).unwrap();
        let inner = TimePeriod::exclusive(10, 100).unwrap();
        let after = TimePeriod::exclusive(100, 200).unwrap();
        assert!(outer.covers(&inner));
        assert!(!inner.covers(&outer));
        assert!(!outer.overlaps(&after));
        assert!(outer.overlaps(&inner));
        assert!(!outer.covers(&TimePeriod::UNDEFINED));
    }
}
