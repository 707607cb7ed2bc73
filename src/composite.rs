//! Composite score aggregation
//!
//! Combines a configurable subset of named metrics into one summary number
//! using a per-user weight vector. Absent components are excluded from both
//! numerator and denominator, so a missing optional metric never drags the
//! composite toward zero. A composite with zero present components returns
//! the neutral sentinel flagged as undetermined.

use crate::baseline::NEUTRAL_SCORE;
use crate::error::EngineError;
use crate::types::{Baseline, Metric, ScoreResult, WeightVector};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Validate a weight map for a named score.
///
/// Rejects unknown component keys, non-finite values, and negative values.
/// A zero weight is valid and means "exclude this component". Validation
/// happens at the write boundary, before any stored vector is touched; on
/// error the caller's original vector remains in effect.
pub fn validate_weights(score: &str, weights: &BTreeMap<String, f64>) -> Result<(), EngineError> {
    for (key, &value) in weights {
        if Metric::parse(key).is_none() {
            return Err(EngineError::UnknownWeightKey {
                score: score.to_string(),
                key: key.clone(),
            });
        }
        if !value.is_finite() {
            return Err(EngineError::NonFiniteWeight {
                key: key.clone(),
                value,
            });
        }
        if value < 0.0 {
            return Err(EngineError::NegativeWeight {
                key: key.clone(),
                value,
            });
        }
    }
    Ok(())
}

/// Compute a weighted composite over component scores.
///
/// The weight vector names the requested components; a component whose score
/// is `None` (required inputs entirely absent) is skipped, as is any
/// zero-weighted component. The denominator is the weight sum of the
/// *present* components only. Output clamped to [0,100].
pub fn composite(
    components: &BTreeMap<String, Option<f64>>,
    weights: &WeightVector,
    baselines: Vec<Baseline>,
    computed_at: DateTime<Utc>,
    engine_instance_id: &str,
) -> ScoreResult {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut present: BTreeMap<String, f64> = BTreeMap::new();

    for (name, &weight) in &weights.weights {
        let Some(Some(value)) = components.get(name) else {
            continue;
        };
        if weight <= 0.0 {
            continue;
        }
        present.insert(name.clone(), *value);
        weighted_sum += weight * value;
        weight_total += weight;
    }

    let (value, undetermined) = if weight_total > 0.0 {
        ((weighted_sum / weight_total).clamp(0.0, 100.0), false)
    } else {
        tracing::debug!(score = %weights.score, "Composite undetermined, no components present");
        (NEUTRAL_SCORE, true)
    };

    ScoreResult {
        metric: weights.score.clone(),
        value,
        undetermined,
        components: present,
        weights: weights.weights.clone(),
        baselines,
        computed_at,
        engine_instance_id: engine_instance_id.to_string(),
    }
}
