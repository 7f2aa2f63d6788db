//! Failure-aware analyser selection.

use super::ResponseTimeAnalyser;
use crate::config::AnalysisConfig;
use crate::counter::RequestCounter;
use crate::error::Result;
use crate::period::TimePeriod;
use crate::stats::calculator;

/// How failed requests relate to the counter an analyser computes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// No failure bookkeeping at all.
    Unaware,
    /// Metrics run over successes and failures together.
    IncludeFailedHits { failed_hits: u64 },
    /// Metrics run over successes; failures only feed the failure
    /// percentage. A counter with nothing but failures still has hits.
    ExcludeFailedHits { failed_hits: u64 },
    /// Like `ExcludeFailedHits`, except failures are tracked but never make
    /// a counter count as having hits.
    WithoutFailedHits { failed_hits: u64 },
}

impl FailureMode {
    pub fn failed_hits(&self) -> u64 {
        match *self {
            FailureMode::Unaware => 0,
            FailureMode::IncludeFailedHits { failed_hits }
            | FailureMode::ExcludeFailedHits { failed_hits }
            | FailureMode::WithoutFailedHits { failed_hits } => failed_hits,
        }
    }

    /// Share of failed requests given the hits of the metrics counter.
    /// Always zero when failures are not tracked.
    pub fn failure_percentage(&self, metric_hits: u64) -> f64 {
        match *self {
            FailureMode::Unaware => 0.0,
            // The metrics counter already holds the failures.
            FailureMode::IncludeFailedHits { failed_hits } => {
                calculator::percentage(failed_hits, metric_hits)
            }
            FailureMode::ExcludeFailedHits { failed_hits }
            | FailureMode::WithoutFailedHits { failed_hits } => {
                calculator::percentage(failed_hits, metric_hits + failed_hits)
            }
        }
    }

    pub fn has_any_hits(&self, metric_hits: u64) -> bool {
        match *self {
            FailureMode::ExcludeFailedHits { failed_hits } => metric_hits + failed_hits > 0,
            _ => metric_hits > 0,
        }
    }
}

/// Whether excluded failures still count towards "has hits".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTracking {
    Counted,
    Uncounted,
}

/// Picks the analyser variant from the two configuration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyserFactory {
    pub failure_aware: bool,
    pub include_failed_hits: bool,
}

impl AnalyserFactory {
    pub fn new(failure_aware: bool, include_failed_hits: bool) -> Self {
        Self {
            failure_aware,
            include_failed_hits,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            config.failure_aware_analysis,
            config.include_failed_hits_in_analysis,
        )
    }

    /// Mode for a counter pair with `failed_hits` failures in the period.
    pub fn failure_mode(&self, failed_hits: u64, tracking: FailureTracking) -> FailureMode {
        match (self.failure_aware, self.include_failed_hits, tracking) {
            (false, _, _) => FailureMode::Unaware,
            (true, true, _) => FailureMode::IncludeFailedHits { failed_hits },
            (true, false, FailureTracking::Counted) => {
                FailureMode::ExcludeFailedHits { failed_hits }
            }
            (true, false, FailureTracking::Uncounted) => {
                FailureMode::WithoutFailedHits { failed_hits }
            }
        }
    }

    /// Analyser over a success counter and its optional failure counter.
    /// Without a failure counter the analysis is failure-unaware over the
    /// successes. An undefined `period` means the union of both counters'
    /// periods.
    pub fn create(
        &self,
        success: &RequestCounter,
        failure: Option<&RequestCounter>,
        period: &TimePeriod,
    ) -> Result<ResponseTimeAnalyser> {
        self.build(success, failure, period, FailureTracking::Counted)
    }

    /// As [`create`](Self::create), but excluded failures never make the
    /// counter count as having hits.
    pub fn create_tracking_failures(
        &self,
        success: &RequestCounter,
        failure: Option<&RequestCounter>,
        period: &TimePeriod,
    ) -> Result<ResponseTimeAnalyser> {
        self.build(success, failure, period, FailureTracking::Uncounted)
    }

    fn build(
        &self,
        success: &RequestCounter,
        failure: Option<&RequestCounter>,
        period: &TimePeriod,
        tracking: FailureTracking,
    ) -> Result<ResponseTimeAnalyser> {
        let Some(failure) = failure else {
            return ResponseTimeAnalyser::new(success, period);
        };
        let period = if period.is_defined() {
            *period
        } else {
            success.period().max_period(&failure.period())
        };
        let failed_hits = RequestCounter::safe_sliced_counter(Some(failure), &period)?.hits()?;
        let mode = self.failure_mode(failed_hits, tracking);
        match mode {
            FailureMode::Unaware | FailureMode::IncludeFailedHits { .. } => {
                let combined =
                    RequestCounter::merged(success.key().clone(), success, failure, &period)?;
                ResponseTimeAnalyser::with_failure_mode(&combined, &period, mode)
            }
            FailureMode::ExcludeFailedHits { .. } | FailureMode::WithoutFailedHits { .. } => {
                ResponseTimeAnalyser::with_failure_mode(success, &period, mode)
            }
        }
    }
}
