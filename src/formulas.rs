//! Metric formula library
//!
//! Pure scoring functions mapping explicit scalars to bounded outputs.
//! Formulas never see raw records and never fail: a missing input yields the
//! formula's documented neutral value. Tuning constants live at the top of
//! the module so calibration can adjust them without touching formula shape.
//!
//! Conventions:
//! - Score-valued outputs are clamped to [0, 100]
//! - Factor-valued outputs are clamped to [0, 1]

use crate::baseline::NEUTRAL_SCORE;
use serde::{Deserialize, Serialize};

/// Speed multiplier at actual/estimated ratio >= 1.0
const PRODUCTIVITY_MULT_MIN: f64 = 3.0;
/// Speed multiplier as the ratio approaches 0
const PRODUCTIVITY_MULT_MAX: f64 = 5.0;
/// Points subtracted per hour of leisure beyond twice the day's work time
const LEISURE_PENALTY_PER_HOUR: f64 = 5.0;
/// Daily work threshold after which the burnout penalty applies (minutes)
const BURNOUT_THRESHOLD_MINUTES: f64 = 480.0;
/// Decay constant for the burnout penalty (minutes of unoffset overwork)
const BURNOUT_DECAY_MINUTES: f64 = 240.0;

/// Per-prior-completion increment of the grit multiplier
const GRIT_INCREMENT: f64 = 0.1;
/// Cap on the grit repetition multiplier
const GRIT_MULT_CAP: f64 = 2.0;
/// Relative weight of the perseverance (overrun) bonus
const GRIT_PERSEVERANCE_WEIGHT: f64 = 0.5;

/// Duration at which relief-weighted effort reaches ~63% saturation (minutes)
const RELIEF_SATURATION_MINUTES: f64 = 60.0;

/// Weight of stated aversion in the difficulty bonus
const AVERSION_WEIGHT: f64 = 0.7;
/// Weight of cognitive/emotional load in the difficulty bonus
const LOAD_WEIGHT: f64 = 0.3;
/// Exponential decay constant for the difficulty bonus
const DIFFICULTY_DECAY: f64 = 50.0;
/// Exponential decay constant for the improvement term
const IMPROVEMENT_DECAY: f64 = 30.0;
/// Threshold both terms must exceed for the compounding bonus
const COMPOUND_THRESHOLD: f64 = 0.3;
/// Flat bonus applied when difficulty and improvement compound
const COMPOUND_BONUS: f64 = 0.1;

/// Execution score base before factor multipliers
const EXECUTION_BASE: f64 = 50.0;
/// Start delay treated as immediate (minutes)
const START_DELAY_GRACE_MINUTES: f64 = 5.0;
/// Start delay at which the linear segment bottoms out (minutes)
const START_DELAY_KNEE_MINUTES: f64 = 60.0;
/// Decay constant for start delays beyond the knee (minutes)
const START_DELAY_DECAY_MINUTES: f64 = 120.0;

/// Spike multiplier gain at zero relief proportion
const SPIKE_GAIN: f64 = 9.0;
/// Divisor scaling the spike product into score space
const SPIKE_SCALE: f64 = 50.0;

/// Productivity score.
///
/// Inputs: completion percentage [0,100], actual/estimated time ratio (> 0),
/// and the day's leisure/work totals in minutes. Output: [0,100].
///
/// Base is the completion percentage, scaled by a speed multiplier that
/// rises from 3.0x at ratio >= 1.0 to 5.0x as the ratio falls toward 0
/// (faster-than-estimated work rewarded), normalized so the fastest full
/// completion scores 100. Leisure exceeding twice the day's work time
/// subtracts proportionally; work beyond 8 hours with no offsetting leisure
/// asymptotically halves the score.
///
/// Missing inputs: no completion percentage -> neutral 50.0; no time ratio
/// -> the baseline 3.0x multiplier; missing day totals -> no penalty.
pub fn productivity_score(
    completion_pct: Option<f64>,
    time_ratio: Option<f64>,
    work_minutes_today: Option<f64>,
    leisure_minutes_today: Option<f64>,
) -> f64 {
    let Some(completion) = completion_pct.filter(|v| v.is_finite()) else {
        return NEUTRAL_SCORE;
    };

    let multiplier = speed_multiplier(time_ratio);
    let mut score = completion.clamp(0.0, 100.0) * multiplier / PRODUCTIVITY_MULT_MAX;

    if let (Some(work), Some(leisure)) = (work_minutes_today, leisure_minutes_today) {
        let excess_leisure = (leisure - 2.0 * work).max(0.0);
        score -= LEISURE_PENALTY_PER_HOUR * excess_leisure / 60.0;
    }

    if let Some(work) = work_minutes_today {
        let leisure = leisure_minutes_today.unwrap_or(0.0);
        let unoffset = (work - BURNOUT_THRESHOLD_MINUTES - leisure).max(0.0);
        if unoffset > 0.0 {
            // Asymptotically reduces the score by up to 50%
            let factor = 0.5 + 0.5 * (-unoffset / BURNOUT_DECAY_MINUTES).exp();
            score *= factor;
        }
    }

    score.clamp(0.0, 100.0)
}

/// Speed multiplier in [3.0, 5.0], decreasing smoothly with the time ratio
fn speed_multiplier(time_ratio: Option<f64>) -> f64 {
    match time_ratio.filter(|r| r.is_finite() && *r >= 0.0) {
        Some(ratio) if ratio < 1.0 => {
            PRODUCTIVITY_MULT_MIN + (PRODUCTIVITY_MULT_MAX - PRODUCTIVITY_MULT_MIN) * (1.0 - ratio)
        }
        Some(_) => PRODUCTIVITY_MULT_MIN,
        None => PRODUCTIVITY_MULT_MIN,
    }
}

/// Persistence ("grit") score.
///
/// Inputs: completion percentage [0,100], count of prior completions of the
/// same activity, actual/estimated time ratio. Output: [0,100].
///
/// Repetition multiplier is `1 + 0.1 * (prior_completions - 1)`, capped at
/// 2.0x. When the actual duration exceeds the estimate, a perseverance
/// bonus of up to +50% applies, scaled by how much longer it took.
///
/// Missing inputs: no completion percentage -> neutral 50.0; no time ratio
/// -> no perseverance bonus.
pub fn grit_score(
    completion_pct: Option<f64>,
    prior_completions: u32,
    time_ratio: Option<f64>,
) -> f64 {
    let Some(completion) = completion_pct.filter(|v| v.is_finite()) else {
        return NEUTRAL_SCORE;
    };

    let repetition = if prior_completions == 0 {
        1.0
    } else {
        (1.0 + GRIT_INCREMENT * (prior_completions as f64 - 1.0)).min(GRIT_MULT_CAP)
    };

    let perseverance = match time_ratio.filter(|r| r.is_finite()) {
        Some(ratio) if ratio > 1.0 => {
            1.0 + GRIT_PERSEVERANCE_WEIGHT * (ratio - 1.0).min(1.0)
        }
        _ => 1.0,
    };

    // Normalized so a first completion with no bonus sits at half scale
    let score = completion.clamp(0.0, 100.0) * repetition * perseverance / 2.0;
    score.clamp(0.0, 100.0)
}

/// Per-instance relief-weighted effort score.
///
/// Inputs: relief [0,100], elapsed duration in minutes. Output: [0,100].
///
/// Relief is weighted by a duration saturation term `1 - exp(-minutes/60)`,
/// so a given relief counts more when it came from sustained effort.
///
/// Missing inputs: no relief -> neutral 50.0; no duration -> the raw relief
/// value.
pub fn relief_effort_score(relief: Option<f64>, elapsed_minutes: Option<f64>) -> f64 {
    let Some(relief) = relief.filter(|v| v.is_finite()) else {
        return NEUTRAL_SCORE;
    };
    let relief = relief.clamp(0.0, 100.0);

    match elapsed_minutes.filter(|m| m.is_finite() && *m >= 0.0) {
        Some(minutes) => {
            let saturation = 1.0 - (-minutes / RELIEF_SATURATION_MINUTES).exp();
            (relief * saturation).clamp(0.0, 100.0)
        }
        None => relief,
    }
}

/// Cumulative relief-weighted effort: sum of relief-fraction-weighted
/// minutes over a set of instances. Unbounded by design (it is a volume
/// figure, not a score). Pairs with a missing side contribute nothing.
pub fn cumulative_relief_effort<I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (Option<f64>, Option<f64>)>,
{
    pairs
        .into_iter()
        .filter_map(|(relief, minutes)| match (relief, minutes) {
            (Some(r), Some(m)) if r.is_finite() && m.is_finite() && m >= 0.0 => {
                Some((r.clamp(0.0, 100.0) / 100.0) * m)
            }
            _ => None,
        })
        .sum()
}

/// Strategy for combining the aversion difficulty and improvement terms.
///
/// `MaxBlend` is the canonical default; the single-term variants exist for
/// callers that want one component in isolation, and behavior never switches
/// implicitly based on data shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AversionStrategy {
    /// max(difficulty, improvement), plus a flat bonus when both compound
    #[default]
    MaxBlend,
    DifficultyOnly,
    ImprovementOnly,
}

/// Aversion-driven difficulty/improvement multiplier.
///
/// Inputs: stated pre-task aversion [0,100], cognitive/emotional load
/// [0,100], historical average aversion for the same activity [0,100].
/// Output: [0,1].
///
/// Difficulty bonus: `1 - exp(-(0.7*aversion + 0.3*load)/50)`. Improvement:
/// `1 - exp(-drop/30)` where drop is how far current aversion sits below the
/// historical average. Under `MaxBlend` the two combine by maximum, plus a
/// flat +0.1 when both exceed 0.3 (compounding difficulty-and-improvement).
///
/// Missing inputs: no aversion -> difficulty term 0; no load -> difficulty
/// from aversion alone; no history -> improvement term 0 (its neutral
/// default, never an error).
pub fn aversion_multiplier(
    initial_aversion: Option<f64>,
    cognitive_load: Option<f64>,
    historical_avg_aversion: Option<f64>,
    strategy: AversionStrategy,
) -> f64 {
    let difficulty = difficulty_bonus(initial_aversion, cognitive_load);
    let improvement = improvement_term(initial_aversion, historical_avg_aversion);

    let combined = match strategy {
        AversionStrategy::DifficultyOnly => difficulty,
        AversionStrategy::ImprovementOnly => improvement,
        AversionStrategy::MaxBlend => {
            let mut value = difficulty.max(improvement);
            if difficulty > COMPOUND_THRESHOLD && improvement > COMPOUND_THRESHOLD {
                value += COMPOUND_BONUS;
            }
            value
        }
    };

    combined.clamp(0.0, 1.0)
}

/// Aversion multiplier scaled into score space [0,100] for the composite
pub fn aversion_score(
    initial_aversion: Option<f64>,
    cognitive_load: Option<f64>,
    historical_avg_aversion: Option<f64>,
    strategy: AversionStrategy,
) -> f64 {
    aversion_multiplier(initial_aversion, cognitive_load, historical_avg_aversion, strategy)
        * 100.0
}

fn difficulty_bonus(initial_aversion: Option<f64>, cognitive_load: Option<f64>) -> f64 {
    let Some(aversion) = initial_aversion.filter(|v| v.is_finite()) else {
        return 0.0;
    };
    let aversion = aversion.clamp(0.0, 100.0);

    let weighted = match cognitive_load.filter(|v| v.is_finite()) {
        Some(load) => AVERSION_WEIGHT * aversion + LOAD_WEIGHT * load.clamp(0.0, 100.0),
        None => aversion,
    };

    1.0 - (-weighted / DIFFICULTY_DECAY).exp()
}

fn improvement_term(
    initial_aversion: Option<f64>,
    historical_avg_aversion: Option<f64>,
) -> f64 {
    match (
        initial_aversion.filter(|v| v.is_finite()),
        historical_avg_aversion.filter(|v| v.is_finite()),
    ) {
        (Some(current), Some(historical)) => {
            let drop = historical.clamp(0.0, 100.0) - current.clamp(0.0, 100.0);
            if drop <= 0.0 {
                0.0
            } else {
                1.0 - (-drop / IMPROVEMENT_DECAY).exp()
            }
        }
        _ => 0.0,
    }
}

/// Explicit inputs to the execution score
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionInputs {
    /// Stated pre-task aversion [0,100]
    pub initial_aversion: Option<f64>,
    /// Actual/estimated time ratio (> 0)
    pub time_ratio: Option<f64>,
    /// Delay between planning and starting (minutes)
    pub start_delay_minutes: Option<f64>,
    /// Completion percentage [0,100]
    pub completion_pct: Option<f64>,
}

/// Four-factor execution score.
///
/// Each sub-factor is independently clamped to [0,1]; a missing input yields
/// that sub-factor's neutral midpoint 0.5 rather than failing the whole
/// computation. The factors combine multiplicatively around a base of 50:
/// difficulty maps to a [1.0, 2.0] multiplier, the other three to
/// [0.5, 1.0]. Output: [0,100].
pub fn execution_score(inputs: &ExecutionInputs) -> f64 {
    let difficulty = inputs
        .initial_aversion
        .filter(|v| v.is_finite())
        .map(|a| (a / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.5);
    let speed = inputs
        .time_ratio
        .filter(|v| v.is_finite())
        .map(speed_factor)
        .unwrap_or(0.5);
    let start = inputs
        .start_delay_minutes
        .filter(|v| v.is_finite())
        .map(start_speed_factor)
        .unwrap_or(0.5);
    let completion = inputs
        .completion_pct
        .filter(|v| v.is_finite())
        .map(completion_quality_factor)
        .unwrap_or(0.5);

    let score = EXECUTION_BASE
        * (1.0 + difficulty)
        * (0.5 + 0.5 * speed)
        * (0.5 + 0.5 * start)
        * (0.5 + 0.5 * completion);

    score.clamp(0.0, 100.0)
}

/// Speed sub-factor from the actual/estimated time ratio.
///
/// Piecewise: ratio <= 0.5 -> 1.0; linear down to 0.5 at ratio = 1.0; then
/// inverse decay `0.5 / ratio` beyond. Output: [0,1].
pub fn speed_factor(time_ratio: f64) -> f64 {
    if time_ratio < 0.0 {
        return 0.5;
    }
    let factor = if time_ratio <= 0.5 {
        1.0
    } else if time_ratio <= 1.0 {
        1.0 - (time_ratio - 0.5)
    } else {
        0.5 / time_ratio
    };
    factor.clamp(0.0, 1.0)
}

/// Start-speed sub-factor from the planning-to-start delay.
///
/// Piecewise: <= 5 minutes -> 1.0; linear down to 0.5 at 60 minutes;
/// exponential decay beyond. Output: [0,1].
pub fn start_speed_factor(delay_minutes: f64) -> f64 {
    if delay_minutes < 0.0 {
        return 0.5;
    }
    let factor = if delay_minutes <= START_DELAY_GRACE_MINUTES {
        1.0
    } else if delay_minutes <= START_DELAY_KNEE_MINUTES {
        let span = START_DELAY_KNEE_MINUTES - START_DELAY_GRACE_MINUTES;
        1.0 - 0.5 * (delay_minutes - START_DELAY_GRACE_MINUTES) / span
    } else {
        0.5 * (-(delay_minutes - START_DELAY_KNEE_MINUTES) / START_DELAY_DECAY_MINUTES).exp()
    };
    factor.clamp(0.0, 1.0)
}

/// Completion-quality sub-factor, stepped by completion percentage bands.
/// Output: [0,1].
pub fn completion_quality_factor(completion_pct: f64) -> f64 {
    let pct = completion_pct.clamp(0.0, 100.0);
    if pct >= 100.0 {
        1.0
    } else if pct >= 90.0 {
        0.85
    } else if pct >= 75.0 {
        0.7
    } else if pct >= 50.0 {
        0.5
    } else if pct >= 25.0 {
        0.3
    } else if pct > 0.0 {
        0.15
    } else {
        0.0
    }
}

/// Obstacle/spike score.
///
/// Inputs: detected deviation ("spike") amount [0,100] and the proportion of
/// the day spent in a relieved state [0,1]. Output: [0,100].
///
/// Formula: `multiplier = 1 + (spike/100) * (1 - relief_proportion) * 9`,
/// `score = spike * multiplier / 50`.
///
/// Missing inputs: no spike -> 0.0 (no deviation detected is this metric's
/// neutral); no relief proportion -> 0.5.
pub fn spike_score(spike_amount: Option<f64>, relief_proportion: Option<f64>) -> f64 {
    let Some(spike) = spike_amount.filter(|v| v.is_finite()) else {
        return 0.0;
    };
    let spike = spike.clamp(0.0, 100.0);
    let relief = relief_proportion
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    let multiplier = 1.0 + (spike / 100.0) * (1.0 - relief) * SPIKE_GAIN;
    (spike * multiplier / SPIKE_SCALE).clamp(0.0, 100.0)
}

/// Deviation of an observation above its baseline, in the metric's own
/// units, floored at zero. The spike score only reacts to upward deviations.
pub fn spike_amount(observed: f64, baseline: f64) -> f64 {
    (observed - baseline).max(0.0).min(100.0)
}
