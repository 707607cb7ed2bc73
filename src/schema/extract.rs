//! Extraction policy table
//!
//! Maps each canonical scalar field to an ordered fallback chain of candidate
//! payload keys. The Record Normalizer evaluates this table exactly once per
//! record; downstream formulas only ever see typed `Option<f64>` scalars,
//! never raw attribute maps.
//!
//! Older records were written under a few historical key spellings (e.g.
//! `aversion` before `initial_aversion` existed), which is why each field
//! carries a chain rather than a single key.

use crate::schema::raw_record::AttrMap;

/// Which nested payload a field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSide {
    Expected,
    Observed,
}

/// Canonical scalar fields derived at normalization time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarField {
    EstimatedMinutes,
    AnticipatedRelief,
    InitialAversion,
    CognitiveLoad,
    CompletionPct,
    Relief,
    FinalAversion,
}

impl ScalarField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarField::EstimatedMinutes => "estimated_minutes",
            ScalarField::AnticipatedRelief => "anticipated_relief",
            ScalarField::InitialAversion => "initial_aversion",
            ScalarField::CognitiveLoad => "cognitive_load",
            ScalarField::CompletionPct => "completion_pct",
            ScalarField::Relief => "relief",
            ScalarField::FinalAversion => "final_aversion",
        }
    }
}

/// One row of the extraction policy table
#[derive(Debug, Clone, Copy)]
pub struct ExtractionPolicy {
    /// Canonical field being extracted
    pub field: ScalarField,
    /// Payload the candidate keys are looked up in
    pub side: PayloadSide,
    /// Candidate keys, tried in order; first numeric hit wins
    pub keys: &'static [&'static str],
    /// Inclusive valid range; values outside are treated as absent
    pub range: (f64, f64),
}

/// The declared extraction policy table
const POLICIES: &[ExtractionPolicy] = &[
    ExtractionPolicy {
        field: ScalarField::EstimatedMinutes,
        side: PayloadSide::Expected,
        keys: &["estimated_minutes", "time_estimate_minutes", "estimate"],
        range: (0.0, 10_080.0),
    },
    ExtractionPolicy {
        field: ScalarField::AnticipatedRelief,
        side: PayloadSide::Expected,
        keys: &["anticipated_relief", "expected_relief"],
        range: (0.0, 100.0),
    },
    ExtractionPolicy {
        field: ScalarField::InitialAversion,
        side: PayloadSide::Expected,
        keys: &["initial_aversion", "aversion"],
        range: (0.0, 100.0),
    },
    ExtractionPolicy {
        field: ScalarField::CognitiveLoad,
        side: PayloadSide::Expected,
        keys: &["cognitive_load", "emotional_load", "load"],
        range: (0.0, 100.0),
    },
    ExtractionPolicy {
        field: ScalarField::CompletionPct,
        side: PayloadSide::Observed,
        keys: &["completion_pct", "completion_percentage", "completed_pct"],
        range: (0.0, 100.0),
    },
    ExtractionPolicy {
        field: ScalarField::Relief,
        side: PayloadSide::Observed,
        keys: &["relief", "felt_relief"],
        range: (0.0, 100.0),
    },
    ExtractionPolicy {
        field: ScalarField::FinalAversion,
        side: PayloadSide::Observed,
        keys: &["final_aversion", "aversion_after", "aversion"],
        range: (0.0, 100.0),
    },
];

/// The full policy table, in declaration order
pub fn extraction_policies() -> &'static [ExtractionPolicy] {
    POLICIES
}

impl ExtractionPolicy {
    /// Evaluate the fallback chain against a parsed attribute map.
    ///
    /// Returns the first candidate key that yields a finite number within
    /// the declared range. Out-of-range values count as absent, not clamped:
    /// an impossible value says more about the payload than the activity.
    pub fn extract(&self, attrs: &AttrMap) -> Option<f64> {
        for key in self.keys {
            if let Some(value) = attrs.get(*key).and_then(|v| v.as_f64_lenient()) {
                if value >= self.range.0 && value <= self.range.1 {
                    return Some(value);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::raw_record::AttrValue;
    use std::collections::HashMap;

    fn policy(field: ScalarField) -> ExtractionPolicy {
        *extraction_policies()
            .iter()
            .find(|p| p.field == field)
            .unwrap()
    }

    #[test]
    fn test_fallback_chain_order() {
        let mut attrs: AttrMap = HashMap::new();
        attrs.insert("aversion".to_string(), AttrValue::from(40.0));
        attrs.insert("initial_aversion".to_string(), AttrValue::from(60.0));

        // Primary key wins over the legacy spelling
        let value = policy(ScalarField::InitialAversion).extract(&attrs);
        assert_eq!(value, Some(60.0));

        attrs.remove("initial_aversion");
        let value = policy(ScalarField::InitialAversion).extract(&attrs);
        assert_eq!(value, Some(40.0));
    }

    #[test]
    fn test_out_of_range_treated_as_absent() {
        let mut attrs: AttrMap = HashMap::new();
        attrs.insert("relief".to_string(), AttrValue::from(250.0));
        assert_eq!(policy(ScalarField::Relief).extract(&attrs), None);

        attrs.insert("relief".to_string(), AttrValue::from(-5.0));
        assert_eq!(policy(ScalarField::Relief).extract(&attrs), None);
    }

    #[test]
    fn test_numeric_string_coercion() {
        let mut attrs: AttrMap = HashMap::new();
        attrs.insert("completion_pct".to_string(), AttrValue::from("85"));
        assert_eq!(policy(ScalarField::CompletionPct).extract(&attrs), Some(85.0));
    }

    #[test]
    fn test_missing_yields_none() {
        let attrs: AttrMap = HashMap::new();
        assert_eq!(policy(ScalarField::EstimatedMinutes).extract(&attrs), None);
    }

    #[test]
    fn test_skips_past_malformed_primary_key() {
        let mut attrs: AttrMap = HashMap::new();
        attrs.insert("estimated_minutes".to_string(), AttrValue::from("soon"));
        attrs.insert("estimate".to_string(), AttrValue::from(30.0));
        assert_eq!(
            policy(ScalarField::EstimatedMinutes).extract(&attrs),
            Some(30.0)
        );
    }
}
