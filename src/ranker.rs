//! Recommendation ranking
//!
//! Orders candidate instances by a primary metric with deterministic
//! tie-breaking, so repeated calls against identical data always produce
//! identical ordering. Candidates whose metric cannot be computed are
//! dropped rather than failing the whole ranking.

use crate::types::ActivityInstance;
use serde::{Deserialize, Serialize};

/// Recommendations returned when the caller does not specify a limit
pub const DEFAULT_LIMIT: usize = 5;

/// Caller-supplied candidate predicates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateFilter {
    /// Restrict to one category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Restrict to one activity template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Exclude candidates estimated longer than this (minutes); candidates
    /// without an estimate pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_estimated_minutes: Option<f64>,
}

impl CandidateFilter {
    pub fn accepts(&self, instance: &ActivityInstance) -> bool {
        if let Some(category) = &self.category {
            if instance.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(template) = &self.template_id {
            if instance.template_id != *template {
                return false;
            }
        }
        if let Some(max_minutes) = self.max_estimated_minutes {
            if let Some(estimate) = instance.estimated_minutes {
                if estimate > max_minutes {
                    return false;
                }
            }
        }
        true
    }
}

/// One ranked recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub instance_id: String,
    pub template_id: String,
    pub score: f64,
    pub estimated_minutes: Option<f64>,
}

/// Rank candidates by a primary metric, descending.
///
/// Ties break by shorter estimated duration, then lexical instance id, in
/// that order. Candidates the filter rejects, and candidates whose score
/// cannot be computed, are silently omitted (the list degrades to fewer
/// entries, never to an error). `limit == 0` means [`DEFAULT_LIMIT`].
pub fn rank<'a, I, F>(candidates: I, score_of: F, filter: &CandidateFilter, limit: usize) -> Vec<RankedCandidate>
where
    I: IntoIterator<Item = &'a ActivityInstance>,
    F: Fn(&ActivityInstance) -> Option<f64>,
{
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter(|instance| filter.accepts(instance))
        .filter_map(|instance| {
            let score = score_of(instance).filter(|s| s.is_finite())?;
            Some(RankedCandidate {
                instance_id: instance.id.clone(),
                template_id: instance.template_id.clone(),
                score,
                estimated_minutes: instance.estimated_minutes,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| match (a.estimated_minutes, b.estimated_minutes) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.instance_id.cmp(&b.instance_id))
    });

    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, category: &str, estimate: Option<f64>) -> ActivityInstance {
        ActivityInstance {
            id: id.to_string(),
            template_id: format!("tmpl-{id}"),
            category: Some(category.to_string()),
            created_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: Utc::now(),
            estimated_minutes: estimate,
            anticipated_relief: None,
            initial_aversion: None,
            cognitive_load: None,
            completion_pct: None,
            relief: None,
            final_aversion: None,
            elapsed_minutes: None,
            start_delay_minutes: None,
            quality_flags: vec![],
        }
    }

    fn ids(ranked: &[RankedCandidate]) -> Vec<&str> {
        ranked.iter().map(|r| r.instance_id.as_str()).collect()
    }

    #[test]
    fn test_orders_by_score_descending() {
        let candidates = vec![
            candidate("a", "focus", Some(30.0)),
            candidate("b", "focus", Some(30.0)),
            candidate("c", "focus", Some(30.0)),
        ];
        let scores = |i: &ActivityInstance| match i.id.as_str() {
            "a" => Some(40.0),
            "b" => Some(90.0),
            _ => Some(70.0),
        };

        let ranked = rank(&candidates, scores, &CandidateFilter::default(), 10);
        assert_eq!(ids(&ranked), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_tie_break_by_estimate_then_id() {
        let candidates = vec![
            candidate("d", "focus", Some(45.0)),
            candidate("b", "focus", Some(30.0)),
            candidate("c", "focus", None),
            candidate("a", "focus", Some(45.0)),
        ];

        let ranked = rank(&candidates, |_| Some(50.0), &CandidateFilter::default(), 10);
        // Equal scores: shorter estimate first, missing estimate last,
        // lexical id between equals
        assert_eq!(ids(&ranked), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn test_ranking_is_stable_across_calls() {
        let candidates = vec![
            candidate("c", "focus", Some(30.0)),
            candidate("a", "focus", Some(30.0)),
            candidate("b", "focus", Some(30.0)),
        ];

        let first = rank(&candidates, |_| Some(66.0), &CandidateFilter::default(), 10);
        let second = rank(&candidates, |_| Some(66.0), &CandidateFilter::default(), 10);
        assert_eq!(first, second);
        assert_eq!(ids(&first), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filters() {
        let candidates = vec![
            candidate("a", "focus", Some(30.0)),
            candidate("b", "errands", Some(30.0)),
            candidate("c", "focus", Some(120.0)),
        ];

        let filter = CandidateFilter {
            category: Some("focus".to_string()),
            max_estimated_minutes: Some(60.0),
            ..Default::default()
        };
        let ranked = rank(&candidates, |_| Some(50.0), &filter, 10);
        assert_eq!(ids(&ranked), vec!["a"]);
    }

    #[test]
    fn test_unscorable_candidates_degrade_gracefully() {
        let candidates = vec![
            candidate("a", "focus", Some(30.0)),
            candidate("b", "focus", Some(30.0)),
        ];
        let scores = |i: &ActivityInstance| if i.id == "a" { Some(80.0) } else { None };

        let ranked = rank(&candidates, scores, &CandidateFilter::default(), 10);
        assert_eq!(ids(&ranked), vec!["a"]);
    }

    #[test]
    fn test_limit_and_default_limit() {
        let candidates: Vec<ActivityInstance> = (0..8)
            .map(|i| candidate(&format!("i{i}"), "focus", Some(30.0)))
            .collect();

        let ranked = rank(&candidates, |_| Some(50.0), &CandidateFilter::default(), 2);
        assert_eq!(ranked.len(), 2);

        let ranked = rank(&candidates, |_| Some(50.0), &CandidateFilter::default(), 0);
        assert_eq!(ranked.len(), DEFAULT_LIMIT);
    }
}
