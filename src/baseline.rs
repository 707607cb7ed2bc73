//! Baseline computation
//!
//! A baseline is a trailing statistical reference value for a metric,
//! scoped globally, per category, or per activity template. Baselines turn
//! raw observations into "relative to your own history" scores.
//!
//! Baselines with fewer than [`MIN_BASELINE_SAMPLES`] data points are
//! `Undefined`; callers receive the neutral sentinel through
//! [`normalize_against`] instead of a numeric artifact of too little data.

use crate::types::{
    Baseline, BaselineMetric, BaselineStat, BaselineValue, NormalizedTable, Scope,
};
use chrono::{DateTime, Duration, Utc};

/// Default trailing window in days
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Minimum sample count below which a baseline is undefined
pub const MIN_BASELINE_SAMPLES: usize = 3;

/// Neutral sentinel returned when there is not enough data to say anything
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Baseline calculator over a normalized table snapshot
pub struct BaselineCalculator<'a> {
    table: &'a NormalizedTable,
}

impl<'a> BaselineCalculator<'a> {
    pub fn new(table: &'a NormalizedTable) -> Self {
        Self { table }
    }

    /// Compute a trailing-window baseline.
    ///
    /// Deterministic given identical inputs: the window is always explicit,
    /// `now` is injected, and median ties resolve by value order. Instances
    /// count toward the sample when they are completed, fall inside the
    /// scope and window, and carry the metric's value.
    ///
    /// `exclude_today` drops instances completed on the same calendar day as
    /// `now`, avoiding same-day feedback loops between scoring and baseline.
    pub fn baseline(
        &self,
        metric: BaselineMetric,
        scope: &Scope,
        window_days: u32,
        stat: BaselineStat,
        exclude_today: bool,
        now: DateTime<Utc>,
    ) -> BaselineValue {
        let window_start = now - Duration::days(i64::from(window_days));
        let today = now.date_naive();

        let mut samples: Vec<f64> = self
            .table
            .rows()
            .iter()
            .filter(|row| row.is_completed() && row.matches_scope(scope))
            .filter(|row| match row.completed_at {
                Some(completed) => {
                    completed >= window_start
                        && completed <= now
                        && !(exclude_today && completed.date_naive() == today)
                }
                None => false,
            })
            .filter_map(|row| metric.value_of(row))
            .collect();

        if samples.len() < MIN_BASELINE_SAMPLES {
            return BaselineValue::Undefined {
                sample_count: samples.len(),
            };
        }

        samples.sort_by(|a, b| a.total_cmp(b));
        let value = match stat {
            BaselineStat::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            BaselineStat::Median => median_of_sorted(&samples),
        };

        BaselineValue::Defined(Baseline {
            metric,
            scope: scope.clone(),
            window_days,
            stat,
            sample_count: samples.len(),
            value,
        })
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Normalize an observation against a baseline into a 0-100 score.
///
/// An observation equal to its baseline maps to exactly 50.0; twice the
/// baseline (or more) maps to 100.0; zero maps to 0.0. A non-positive
/// baseline carries no information and yields the neutral score.
pub fn normalize_to_baseline(observation: f64, baseline: f64) -> f64 {
    if baseline <= 0.0 || !baseline.is_finite() || !observation.is_finite() {
        return NEUTRAL_SCORE;
    }
    (NEUTRAL_SCORE * observation / baseline).clamp(0.0, 100.0)
}

/// Normalize an observation against a possibly-undefined baseline.
///
/// Undefined baselines yield the neutral score; "not enough data" never
/// shows up as an extreme value.
pub fn normalize_against(observation: Option<f64>, baseline: &BaselineValue) -> f64 {
    match (observation, baseline.value()) {
        (Some(obs), Some(base)) => normalize_to_baseline(obs, base),
        _ => NEUTRAL_SCORE,
    }
}
