//! Core types for the Taskpulse pipeline
//!
//! This module defines the data structures that flow through each stage of
//! the pipeline: normalized instance rows, baseline descriptors, weight
//! vectors, and score results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Scope descriptor for baselines, aggregates, and cache keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// All instances
    Global,
    /// Instances sharing a category tag
    Category(String),
    /// Instances of one activity template
    Template(String),
}

impl Scope {
    pub fn as_key(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Category(c) => format!("category:{c}"),
            Scope::Template(t) => format!("template:{t}"),
        }
    }
}

/// Aggregation statistic for baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStat {
    Mean,
    Median,
}

/// Per-row scalar a baseline can be computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMetric {
    Relief,
    InitialAversion,
    CognitiveLoad,
    ElapsedMinutes,
    CompletionPct,
}

impl BaselineMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineMetric::Relief => "relief",
            BaselineMetric::InitialAversion => "initial_aversion",
            BaselineMetric::CognitiveLoad => "cognitive_load",
            BaselineMetric::ElapsedMinutes => "elapsed_minutes",
            BaselineMetric::CompletionPct => "completion_pct",
        }
    }

    /// Read this metric's value from a normalized row
    pub fn value_of(&self, instance: &ActivityInstance) -> Option<f64> {
        match self {
            BaselineMetric::Relief => instance.relief,
            BaselineMetric::InitialAversion => instance.initial_aversion,
            BaselineMetric::CognitiveLoad => instance.cognitive_load,
            BaselineMetric::ElapsedMinutes => instance.elapsed_minutes,
            BaselineMetric::CompletionPct => instance.completion_pct,
        }
    }
}

/// Named score metrics exposed by the formula library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Productivity,
    Grit,
    ReliefEffort,
    Aversion,
    Execution,
    Spike,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Productivity,
        Metric::Grit,
        Metric::ReliefEffort,
        Metric::Aversion,
        Metric::Execution,
        Metric::Spike,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Productivity => "productivity",
            Metric::Grit => "grit",
            Metric::ReliefEffort => "relief_effort",
            Metric::Aversion => "aversion",
            Metric::Execution => "execution",
            Metric::Spike => "spike",
        }
    }

    pub fn parse(name: &str) -> Option<Metric> {
        Metric::ALL.iter().copied().find(|m| m.as_str() == name)
    }
}

/// Quality flag recorded during normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MalformedExpectedPayload,
    MalformedObservedPayload,
    MissingEstimate,
    MissingCompletion,
    MissingLifecycleTimestamps,
}

/// One row of the normalized table: a typed snapshot of an activity instance.
///
/// Every derived scalar is either a finite number or `None`; raw attribute
/// maps never leave the Normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityInstance {
    /// Instance identifier
    pub id: String,
    /// Parent activity-template identifier
    pub template_id: String,
    /// Category/type tag
    pub category: Option<String>,
    /// Lifecycle timestamps
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Last mutation time of the source record
    pub updated_at: DateTime<Utc>,
    /// Planning-time estimate (minutes)
    pub estimated_minutes: Option<f64>,
    /// Planning-time anticipated relief (0-100)
    pub anticipated_relief: Option<f64>,
    /// Planning-time stated aversion (0-100)
    pub initial_aversion: Option<f64>,
    /// Planning-time cognitive/emotional load (0-100)
    pub cognitive_load: Option<f64>,
    /// Observed completion percentage (0-100)
    pub completion_pct: Option<f64>,
    /// Observed relief at completion (0-100)
    pub relief: Option<f64>,
    /// Observed aversion after completion (0-100)
    pub final_aversion: Option<f64>,
    /// Elapsed working duration (minutes), from started/completed timestamps
    pub elapsed_minutes: Option<f64>,
    /// Delay between planning and starting (minutes)
    pub start_delay_minutes: Option<f64>,
    /// Data-quality flags recorded during normalization
    pub quality_flags: Vec<QualityFlag>,
}

impl ActivityInstance {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some() && self.cancelled_at.is_none()
    }

    /// Whether this row falls inside a scope
    pub fn matches_scope(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Global => true,
            Scope::Category(c) => self.category.as_deref() == Some(c.as_str()),
            Scope::Template(t) => self.template_id == *t,
        }
    }

    /// Actual/estimated time ratio, when both sides are usable
    pub fn time_ratio(&self) -> Option<f64> {
        match (self.elapsed_minutes, self.estimated_minutes) {
            (Some(actual), Some(estimate)) if estimate > 0.0 => Some(actual / estimate),
            _ => None,
        }
    }
}

/// Normalized table: append-only snapshot produced by the Record Normalizer
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedTable {
    rows: Vec<ActivityInstance>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// When this snapshot was computed
    pub computed_at: DateTime<Utc>,
    /// Records dropped or repaired during normalization
    pub quality_event_count: usize,
}

impl NormalizedTable {
    pub fn new(
        rows: Vec<ActivityInstance>,
        computed_at: DateTime<Utc>,
        quality_event_count: usize,
    ) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self {
            rows,
            index,
            computed_at,
            quality_event_count,
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<&ActivityInstance> {
        self.index.get(instance_id).map(|&i| &self.rows[i])
    }

    pub fn rows(&self) -> &[ActivityInstance] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Completed instances of a template, ordered by completion time
    pub fn completions_of_template(&self, template_id: &str) -> Vec<&ActivityInstance> {
        let mut completions: Vec<&ActivityInstance> = self
            .rows
            .iter()
            .filter(|r| r.template_id == template_id && r.is_completed())
            .collect();
        completions.sort_by_key(|r| r.completed_at);
        completions
    }
}

// The id index is derived state; it is not serialized and must be rebuilt
// when a table comes back off the wire.
impl<'de> Deserialize<'de> for NormalizedTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            rows: Vec<ActivityInstance>,
            computed_at: DateTime<Utc>,
            quality_event_count: usize,
        }

        let wire = Wire::deserialize(deserializer)?;
        Ok(NormalizedTable::new(
            wire.rows,
            wire.computed_at,
            wire.quality_event_count,
        ))
    }
}

/// Baseline descriptor with its computed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub metric: BaselineMetric,
    pub scope: Scope,
    pub window_days: u32,
    pub stat: BaselineStat,
    pub sample_count: usize,
    pub value: f64,
}

/// Baseline computation outcome.
///
/// `Undefined` is an explicit "not enough data" sentinel, distinct from any
/// numeric value; callers render it as such rather than showing an artifact
/// of a thin sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BaselineValue {
    Defined(Baseline),
    Undefined { sample_count: usize },
}

impl BaselineValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            BaselineValue::Defined(b) => Some(b.value),
            BaselineValue::Undefined { .. } => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, BaselineValue::Defined(_))
    }
}

/// Per-user weight vector for one named composite score.
///
/// Weights are kept in a `BTreeMap` so iteration (and therefore composite
/// arithmetic and serialized form) is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    /// Name of the composite score these weights belong to
    pub score: String,
    /// Component metric name -> weight
    pub weights: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WeightVector {
    /// Default weights: every component metric weighted equally
    pub fn default_for(score: impl Into<String>, now: DateTime<Utc>) -> Self {
        let weights = Metric::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), 1.0))
            .collect();
        Self {
            score: score.into(),
            weights,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Computed score with the inputs needed to reproduce it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Metric or composite score name
    pub metric: String,
    /// Score value in [0, 100]
    pub value: f64,
    /// True when zero components were present and the value is the neutral
    /// sentinel rather than a measurement
    pub undetermined: bool,
    /// Present component scores
    pub components: BTreeMap<String, f64>,
    /// Weight snapshot used
    pub weights: BTreeMap<String, f64>,
    /// Baseline snapshot used
    pub baselines: Vec<Baseline>,
    pub computed_at: DateTime<Utc>,
    /// Engine instance that produced this result
    pub engine_instance_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_instance(id: &str, template: &str, category: Option<&str>) -> ActivityInstance {
        ActivityInstance {
            id: id.to_string(),
            template_id: template.to_string(),
            category: category.map(|c| c.to_string()),
            created_at: None,
            started_at: None,
            completed_at: Some(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()),
            cancelled_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
            estimated_minutes: Some(60.0),
            anticipated_relief: None,
            initial_aversion: Some(40.0),
            cognitive_load: None,
            completion_pct: Some(100.0),
            relief: Some(70.0),
            final_aversion: None,
            elapsed_minutes: Some(30.0),
            start_delay_minutes: None,
            quality_flags: vec![],
        }
    }

    #[test]
    fn test_scope_matching() {
        let instance = make_instance("i1", "t1", Some("focus"));
        assert!(instance.matches_scope(&Scope::Global));
        assert!(instance.matches_scope(&Scope::Category("focus".to_string())));
        assert!(!instance.matches_scope(&Scope::Category("errands".to_string())));
        assert!(instance.matches_scope(&Scope::Template("t1".to_string())));
        assert!(!instance.matches_scope(&Scope::Template("t2".to_string())));
    }

    #[test]
    fn test_time_ratio() {
        let mut instance = make_instance("i1", "t1", None);
        assert_eq!(instance.time_ratio(), Some(0.5));

        instance.estimated_minutes = Some(0.0);
        assert_eq!(instance.time_ratio(), None);

        instance.estimated_minutes = None;
        assert_eq!(instance.time_ratio(), None);
    }

    #[test]
    fn test_table_lookup_and_completions() {
        let rows = vec![
            make_instance("i1", "t1", None),
            make_instance("i2", "t1", None),
            make_instance("i3", "t2", None),
        ];
        let table = NormalizedTable::new(rows, Utc::now(), 0);

        assert_eq!(table.len(), 3);
        assert!(table.get("i2").is_some());
        assert!(table.get("missing").is_none());
        assert_eq!(table.completions_of_template("t1").len(), 2);
    }

    #[test]
    fn test_table_round_trip_rebuilds_index() {
        let rows = vec![
            make_instance("i1", "t1", None),
            make_instance("i2", "t1", None),
        ];
        let table = NormalizedTable::new(rows, Utc::now(), 1);

        let json = serde_json::to_string(&table).unwrap();
        let restored: NormalizedTable = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("i2").unwrap().id, "i2");
        assert_eq!(restored.quality_event_count, 1);
    }

    #[test]
    fn test_cancelled_is_not_completed() {
        let mut instance = make_instance("i1", "t1", None);
        instance.cancelled_at = Some(Utc::now());
        assert!(!instance.is_completed());
    }

    #[test]
    fn test_default_weight_vector_covers_all_metrics() {
        let weights = WeightVector::default_for("wellbeing", Utc::now());
        assert_eq!(weights.weights.len(), Metric::ALL.len());
        assert!(weights.weights.values().all(|&w| w == 1.0));
    }

    #[test]
    fn test_metric_parse_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::parse(metric.as_str()), Some(metric));
        }
        assert_eq!(Metric::parse("unknown"), None);
    }
}
