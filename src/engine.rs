//! Engine facade
//!
//! `ScoreEngine` orchestrates the full pipeline: it pulls raw records from
//! the injected instance source, normalizes them into the cached table,
//! and answers score, aggregate, composite, and recommendation queries.
//! Write-side collaborators call [`ScoreEngine::invalidate`] after any
//! mutation; the engine never mutates source records itself.

use crate::baseline::{BaselineCalculator, DEFAULT_WINDOW_DAYS, NEUTRAL_SCORE};
use crate::cache::{CacheKey, Clock, EngineCache, SystemClock};
use crate::composite::{composite, validate_weights};
use crate::error::EngineError;
use crate::formulas::{
    aversion_score, cumulative_relief_effort, execution_score, grit_score, productivity_score,
    relief_effort_score, spike_amount, spike_score, AversionStrategy, ExecutionInputs,
};
use crate::normalizer::RecordNormalizer;
use crate::ranker::{rank, CandidateFilter, RankedCandidate};
use crate::schema::raw_record::RawRecord;
use crate::types::{
    ActivityInstance, Baseline, BaselineMetric, BaselineStat, BaselineValue, Metric,
    NormalizedTable, ScoreResult, Scope, WeightVector,
};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Name of the default composite score
pub const DEFAULT_COMPOSITE_SCORE: &str = "wellbeing";

/// Category tag treated as leisure time in day totals
const LEISURE_CATEGORY: &str = "leisure";

/// Read-only collaborator that owns record persistence.
///
/// The engine only ever reads through this seam; creation, mutation, and
/// deletion of instances happen on the write side, which signals the engine
/// through [`ScoreEngine::invalidate`].
pub trait InstanceSource: Send + Sync {
    fn list_instances(&self, scope: &Scope) -> Result<Vec<RawRecord>, EngineError>;
}

/// In-memory instance source, for tests and batch CLI runs
pub struct InMemorySource {
    records: RwLock<Vec<RawRecord>>,
}

impl InMemorySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Replace the record set (callers pair this with `engine.invalidate()`)
    pub fn replace(&self, records: Vec<RawRecord>) {
        *self.records.write() = records;
    }
}

impl InstanceSource for InMemorySource {
    fn list_instances(&self, _scope: &Scope) -> Result<Vec<RawRecord>, EngineError> {
        Ok(self.records.read().clone())
    }
}

/// Analytics and scoring engine over a batch snapshot of activity records
pub struct ScoreEngine {
    source: Arc<dyn InstanceSource>,
    clock: Arc<dyn Clock>,
    table_cache: EngineCache<Arc<NormalizedTable>>,
    aggregate_cache: EngineCache<BaselineValue>,
    weights: RwLock<HashMap<(String, String), WeightVector>>,
    aversion_strategy: AversionStrategy,
    exclude_today: bool,
    instance_id: String,
}

impl ScoreEngine {
    pub fn new(source: Arc<dyn InstanceSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn InstanceSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            table_cache: EngineCache::new(Arc::clone(&clock)),
            aggregate_cache: EngineCache::new(Arc::clone(&clock)),
            clock,
            weights: RwLock::new(HashMap::new()),
            aversion_strategy: AversionStrategy::default(),
            exclude_today: true,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Select a non-default aversion blending strategy
    pub fn with_aversion_strategy(mut self, strategy: AversionStrategy) -> Self {
        self.aversion_strategy = strategy;
        self
    }

    /// Compute one metric for one instance. Value is always in [0,100];
    /// when the metric's inputs are entirely absent the neutral sentinel
    /// comes back rather than an error.
    pub fn compute_score(&self, metric: Metric, instance_id: &str) -> Result<f64, EngineError> {
        let table = self.table()?;
        let row = table
            .get(instance_id)
            .ok_or_else(|| EngineError::UnknownInstance(instance_id.to_string()))?;
        Ok(self
            .score_instance(metric, row, &table)
            .unwrap_or(NEUTRAL_SCORE))
    }

    /// Compute a trailing-window aggregate (baseline) for a metric and
    /// scope. `Undefined` means not enough data, and callers should render
    /// it that way.
    pub fn compute_aggregate(
        &self,
        metric: BaselineMetric,
        scope: &Scope,
        window_days: u32,
    ) -> Result<BaselineValue, EngineError> {
        let key = CacheKey::new(
            scope.as_key(),
            format!("aggregate:{}:{window_days}", metric.as_str()),
        );
        if let Some(cached) = self.aggregate_cache.get(&key) {
            return Ok(cached);
        }

        let table = self.table()?;
        let value = BaselineCalculator::new(&table).baseline(
            metric,
            scope,
            window_days,
            BaselineStat::Mean,
            self.exclude_today,
            self.clock.now(),
        );
        self.aggregate_cache.insert(key, value.clone());
        Ok(value)
    }

    /// Compute the composite score for a scope under a user's stored
    /// weights (defaults on first access).
    pub fn compute_composite(
        &self,
        scope: &Scope,
        user_id: &str,
        score: &str,
    ) -> Result<ScoreResult, EngineError> {
        let weights = self.get_weight_vector(user_id, score);
        self.compute_composite_with(scope, &weights)
    }

    /// Compute the composite score for a scope under an explicit weight
    /// vector (callers validating/experimenting without persisting).
    pub fn compute_composite_with(
        &self,
        scope: &Scope,
        weights: &WeightVector,
    ) -> Result<ScoreResult, EngineError> {
        let table = self.table()?;
        let rows: Vec<&ActivityInstance> = table
            .rows()
            .iter()
            .filter(|row| row.is_completed() && row.matches_scope(scope))
            .collect();

        // Each component is the mean of the per-instance scores that could
        // be computed; a component with no computable instance is absent.
        let mut components: BTreeMap<String, Option<f64>> = BTreeMap::new();
        for metric in Metric::ALL {
            let scores: Vec<f64> = rows
                .iter()
                .filter_map(|row| self.score_instance(metric, row, &table))
                .collect();
            let value = if scores.is_empty() {
                None
            } else {
                Some(scores.iter().sum::<f64>() / scores.len() as f64)
            };
            components.insert(metric.as_str().to_string(), value);
        }

        let baselines = self.baseline_snapshot(scope, &table);
        Ok(composite(
            &components,
            weights,
            baselines,
            self.clock.now(),
            &self.instance_id,
        ))
    }

    /// Rank candidate instances (planned, not yet completed or cancelled)
    /// by a primary metric. Degrades to fewer entries when candidates
    /// cannot be scored.
    pub fn get_recommendations(
        &self,
        filter: &CandidateFilter,
        metric: Metric,
        limit: usize,
    ) -> Result<Vec<RankedCandidate>, EngineError> {
        let table = self.table()?;
        let candidates = table
            .rows()
            .iter()
            .filter(|row| row.completed_at.is_none() && row.cancelled_at.is_none());
        Ok(rank(
            candidates,
            |row| self.score_instance(metric, row, &table),
            filter,
            limit,
        ))
    }

    /// Write notification hook: drop cached state.
    ///
    /// Every notification bumps the global generation of both caches.
    /// Aggregates under overlapping scopes (global, the mutated instance's
    /// template) can hold data from any write, so the coarse bump is the
    /// only response that never serves a stale post-write value. A scope,
    /// when given, additionally ticks that scope's own counter.
    pub fn invalidate(&self, scope: Option<&Scope>) {
        self.table_cache.invalidate(None);
        if let Some(scope) = scope {
            self.aggregate_cache.invalidate(Some(&scope.as_key()));
        }
        self.aggregate_cache.invalidate(None);
    }

    /// Fetch a user's weight vector, creating defaults on first access
    pub fn get_weight_vector(&self, user_id: &str, score: &str) -> WeightVector {
        let key = (user_id.to_string(), score.to_string());
        if let Some(existing) = self.weights.read().get(&key) {
            return existing.clone();
        }
        let mut weights = self.weights.write();
        weights
            .entry(key)
            .or_insert_with(|| WeightVector::default_for(score, self.clock.now()))
            .clone()
    }

    /// Replace a user's weight vector.
    ///
    /// Validation happens before any stored state changes; on error the
    /// previously stored vector remains in effect.
    pub fn set_weight_vector(
        &self,
        user_id: &str,
        score: &str,
        weights: BTreeMap<String, f64>,
    ) -> Result<WeightVector, EngineError> {
        validate_weights(score, &weights)?;

        let now = self.clock.now();
        let key = (user_id.to_string(), score.to_string());
        let mut store = self.weights.write();
        let vector = match store.get(&key) {
            Some(existing) => WeightVector {
                score: score.to_string(),
                weights,
                created_at: existing.created_at,
                updated_at: now,
            },
            None => WeightVector {
                score: score.to_string(),
                weights,
                created_at: now,
                updated_at: now,
            },
        };
        store.insert(key, vector.clone());
        drop(store);

        // Composite results depend on weights
        self.invalidate(None);
        Ok(vector)
    }

    /// Serialize the weight table to JSON. Pure cache, safe to discard and
    /// recompute; persisting it only preserves user preferences.
    pub fn save_weights(&self) -> Result<String, EngineError> {
        let store = self.weights.read();
        let flat: BTreeMap<String, &WeightVector> = store
            .iter()
            .map(|((user, score), v)| (format!("{user}:{score}"), v))
            .collect();
        Ok(serde_json::to_string(&flat)?)
    }

    /// Load a weight table previously produced by [`save_weights`].
    /// Entries that fail validation are skipped, not fatal.
    pub fn load_weights(&self, json: &str) -> Result<(), EngineError> {
        let flat: BTreeMap<String, WeightVector> = serde_json::from_str(json)?;
        let mut store = self.weights.write();
        for (key, vector) in flat {
            let Some((user, score)) = key.split_once(':') else {
                tracing::warn!(key = %key, "Skipping malformed weight table key");
                continue;
            };
            if let Err(error) = validate_weights(score, &vector.weights) {
                tracing::warn!(key = %key, %error, "Skipping invalid stored weight vector");
                continue;
            }
            store.insert((user.to_string(), score.to_string()), vector);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// The cached normalized table, recomputed from the source on a cache
    /// miss. Source errors are propagated, never cached.
    fn table(&self) -> Result<Arc<NormalizedTable>, EngineError> {
        let key = CacheKey::new("global", "normalized_table");
        if let Some(table) = self.table_cache.get(&key) {
            return Ok(table);
        }
        let records = self.source.list_instances(&Scope::Global)?;
        let table = Arc::new(RecordNormalizer::normalize(&records, self.clock.now()));
        if table.quality_event_count > 0 {
            tracing::warn!(
                quality_events = table.quality_event_count,
                rows = table.len(),
                "Normalized table built with data-quality events"
            );
        }
        self.table_cache.insert(key, Arc::clone(&table));
        Ok(table)
    }

    /// Per-instance metric score.
    ///
    /// `None` means the metric's required inputs are entirely absent for
    /// this row — the component is excluded from composites and rankings
    /// rather than contributing a fake zero.
    fn score_instance(
        &self,
        metric: Metric,
        row: &ActivityInstance,
        table: &NormalizedTable,
    ) -> Option<f64> {
        match metric {
            Metric::Productivity => {
                row.completion_pct?;
                let (work, leisure) = self.day_totals(table, row);
                Some(productivity_score(
                    row.completion_pct,
                    row.time_ratio(),
                    work,
                    leisure,
                ))
            }
            Metric::Grit => {
                row.completion_pct?;
                let prior = self.prior_completions(table, row);
                Some(grit_score(row.completion_pct, prior, row.time_ratio()))
            }
            Metric::ReliefEffort => {
                row.relief?;
                Some(relief_effort_score(row.relief, row.elapsed_minutes))
            }
            Metric::Aversion => {
                row.initial_aversion?;
                let historical = self
                    .template_baseline(table, BaselineMetric::InitialAversion, &row.template_id)
                    .and_then(|b| b.value());
                Some(aversion_score(
                    row.initial_aversion,
                    row.cognitive_load,
                    historical,
                    self.aversion_strategy,
                ))
            }
            Metric::Execution => {
                if row.initial_aversion.is_none()
                    && row.time_ratio().is_none()
                    && row.start_delay_minutes.is_none()
                    && row.completion_pct.is_none()
                {
                    return None;
                }
                Some(execution_score(&ExecutionInputs {
                    initial_aversion: row.initial_aversion,
                    time_ratio: row.time_ratio(),
                    start_delay_minutes: row.start_delay_minutes,
                    completion_pct: row.completion_pct,
                }))
            }
            Metric::Spike => {
                let relief = row.relief?;
                let baseline = self
                    .scope_baseline(table, BaselineMetric::Relief, &self.scope_of(row))
                    .and_then(|b| b.value())?;
                let spike = spike_amount(relief, baseline);
                let proportion = self.relief_proportion_of_day(table, row);
                Some(spike_score(Some(spike), proportion))
            }
        }
    }

    fn scope_of(&self, row: &ActivityInstance) -> Scope {
        match &row.category {
            Some(category) => Scope::Category(category.clone()),
            None => Scope::Global,
        }
    }

    fn template_baseline(
        &self,
        table: &NormalizedTable,
        metric: BaselineMetric,
        template_id: &str,
    ) -> Option<BaselineValue> {
        self.scope_baseline(table, metric, &Scope::Template(template_id.to_string()))
    }

    fn scope_baseline(
        &self,
        table: &NormalizedTable,
        metric: BaselineMetric,
        scope: &Scope,
    ) -> Option<BaselineValue> {
        Some(BaselineCalculator::new(table).baseline(
            metric,
            scope,
            DEFAULT_WINDOW_DAYS,
            BaselineStat::Mean,
            self.exclude_today,
            self.clock.now(),
        ))
    }

    /// Baselines consulted for a scope, for the reproducibility snapshot
    fn baseline_snapshot(&self, scope: &Scope, table: &NormalizedTable) -> Vec<Baseline> {
        [BaselineMetric::Relief, BaselineMetric::InitialAversion]
            .into_iter()
            .filter_map(|metric| match self.scope_baseline(table, metric, scope) {
                Some(BaselineValue::Defined(baseline)) => Some(baseline),
                _ => None,
            })
            .collect()
    }

    /// Work and leisure minute totals for the row's completion day.
    /// Leisure is anything tagged with the leisure category; work is the
    /// rest.
    fn day_totals(
        &self,
        table: &NormalizedTable,
        row: &ActivityInstance,
    ) -> (Option<f64>, Option<f64>) {
        let Some(date) = row.completed_at.map(|t| t.date_naive()) else {
            return (None, None);
        };
        let mut work = 0.0;
        let mut leisure = 0.0;
        for other in self.rows_of_day(table, date) {
            let Some(minutes) = other.elapsed_minutes else {
                continue;
            };
            if other.category.as_deref() == Some(LEISURE_CATEGORY) {
                leisure += minutes;
            } else {
                work += minutes;
            }
        }
        (Some(work), Some(leisure))
    }

    /// Proportion of the day's effort spent in a relieved state:
    /// relief-weighted minutes over total minutes
    fn relief_proportion_of_day(
        &self,
        table: &NormalizedTable,
        row: &ActivityInstance,
    ) -> Option<f64> {
        let date = row.completed_at.map(|t| t.date_naive())?;
        let day_rows: Vec<&ActivityInstance> = self.rows_of_day(table, date).collect();
        let total: f64 = day_rows.iter().filter_map(|r| r.elapsed_minutes).sum();
        if total <= 0.0 {
            return None;
        }
        let relieved = cumulative_relief_effort(
            day_rows.iter().map(|r| (r.relief, r.elapsed_minutes)),
        );
        Some((relieved / total).clamp(0.0, 1.0))
    }

    fn rows_of_day<'t>(
        &self,
        table: &'t NormalizedTable,
        date: NaiveDate,
    ) -> impl Iterator<Item = &'t ActivityInstance> {
        table.rows().iter().filter(move |r| {
            r.is_completed() && r.completed_at.map(|t| t.date_naive()) == Some(date)
        })
    }

    /// Count of completions of the same template strictly before this row
    fn prior_completions(&self, table: &NormalizedTable, row: &ActivityInstance) -> u32 {
        let Some(completed) = row.completed_at else {
            return 0;
        };
        table
            .completions_of_template(&row.template_id)
            .iter()
            .filter(|other| {
                other.id != row.id
                    && other.completed_at.map(|t| t < completed).unwrap_or(false)
            })
            .count() as u32
            + 1
    }

    /// Time source, exposed for callers that need consistent timestamps
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn completed(
        id: &str,
        template: &str,
        category: &str,
        completed_at: DateTime<Utc>,
        elapsed_minutes: i64,
        observed: serde_json::Value,
        expected: serde_json::Value,
    ) -> RawRecord {
        let mut record = RawRecord::new(id, template, completed_at).with_category(category);
        record.created_at = Some(completed_at - Duration::minutes(elapsed_minutes + 10));
        record.started_at = Some(completed_at - Duration::minutes(elapsed_minutes));
        record.completed_at = Some(completed_at);
        record.with_expected(expected).with_observed(observed)
    }

    fn sample_records() -> Vec<RawRecord> {
        let mut records = Vec::new();
        // A week of completed focus work on one template
        for i in 0..5u32 {
            records.push(completed(
                &format!("done-{i}"),
                "tmpl-report",
                "focus",
                day(10 + i, 12),
                30,
                serde_json::json!({ "completion_pct": 100.0, "relief": 60.0 + i as f64 }),
                serde_json::json!({
                    "estimated_minutes": 60,
                    "initial_aversion": 70.0,
                    "cognitive_load": 50.0
                }),
            ));
        }
        // Pending candidates
        for (id, aversion, estimate) in
            [("todo-a", 80.0, 30), ("todo-b", 40.0, 30), ("todo-c", 80.0, 90)]
        {
            let mut record = RawRecord::new(id, &format!("tmpl-{id}"), day(19, 9))
                .with_category("focus")
                .with_expected(serde_json::json!({
                    "estimated_minutes": estimate,
                    "initial_aversion": aversion,
                    "cognitive_load": 50.0
                }));
            record.created_at = Some(day(19, 9));
            records.push(record);
        }
        records
    }

    fn engine_with(records: Vec<RawRecord>) -> (ScoreEngine, Arc<InMemorySource>) {
        let source = Arc::new(InMemorySource::new(records));
        let clock = Arc::new(ManualClock::new(day(19, 12)));
        let engine = ScoreEngine::with_clock(
            Arc::clone(&source) as Arc<dyn InstanceSource>,
            clock,
        );
        (engine, source)
    }

    #[test]
    fn test_scores_are_bounded() {
        let (engine, _) = engine_with(sample_records());
        for metric in Metric::ALL {
            let score = engine.compute_score(metric, "done-2").unwrap();
            assert!(
                (0.0..=100.0).contains(&score),
                "{} out of bounds: {score}",
                metric.as_str()
            );
        }
    }

    #[test]
    fn test_unknown_instance_is_an_error() {
        let (engine, _) = engine_with(sample_records());
        assert!(matches!(
            engine.compute_score(Metric::Productivity, "missing"),
            Err(EngineError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_aggregate_and_undefined() {
        let (engine, _) = engine_with(sample_records());

        let relief = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        // Mean of 60..64
        assert_eq!(relief.value(), Some(62.0));

        let empty = engine
            .compute_aggregate(
                BaselineMetric::Relief,
                &Scope::Category("errands".to_string()),
                30,
            )
            .unwrap();
        assert!(!empty.is_defined());
    }

    #[test]
    fn test_aggregate_idempotent_without_writes() {
        let (engine, _) = engine_with(sample_records());
        let a = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        let b = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalidation_serves_fresh_data() {
        let (engine, source) = engine_with(sample_records());

        let before = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(before.value(), Some(62.0));

        // Write side mutates a record and notifies
        let mut records = sample_records();
        records.retain(|r| r.instance_id != "done-0");
        records.push(completed(
            "done-0",
            "tmpl-report",
            "focus",
            day(10, 12),
            30,
            serde_json::json!({ "completion_pct": 100.0, "relief": 100.0 }),
            serde_json::json!({ "estimated_minutes": 60 }),
        ));
        source.replace(records);

        // Stale until notified
        let stale = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(stale.value(), Some(62.0));

        engine.invalidate(None);
        let fresh = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(fresh.value(), Some(70.0));
    }

    #[test]
    fn test_scoped_invalidation_refreshes_overlapping_aggregates() {
        let (engine, source) = engine_with(sample_records());

        let global = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(global.value(), Some(62.0));
        let template = engine
            .compute_aggregate(
                BaselineMetric::Relief,
                &Scope::Template("tmpl-report".to_string()),
                30,
            )
            .unwrap();
        assert_eq!(template.value(), Some(62.0));

        let mut records = sample_records();
        records.retain(|r| r.instance_id != "done-0");
        records.push(completed(
            "done-0",
            "tmpl-report",
            "focus",
            day(10, 12),
            30,
            serde_json::json!({ "completion_pct": 100.0, "relief": 100.0 }),
            serde_json::json!({ "estimated_minutes": 60 }),
        ));
        source.replace(records);

        // A write notified under one category must not leave aggregates
        // cached under other scopes of the same data stale
        engine.invalidate(Some(&Scope::Category("focus".to_string())));

        let global = engine
            .compute_aggregate(BaselineMetric::Relief, &Scope::Global, 30)
            .unwrap();
        assert_eq!(global.value(), Some(70.0));
        let template = engine
            .compute_aggregate(
                BaselineMetric::Relief,
                &Scope::Template("tmpl-report".to_string()),
                30,
            )
            .unwrap();
        assert_eq!(template.value(), Some(70.0));
    }

    #[test]
    fn test_recommendations_ordering_and_stability() {
        let (engine, _) = engine_with(sample_records());
        let filter = CandidateFilter {
            category: Some("focus".to_string()),
            ..Default::default()
        };

        let first = engine
            .get_recommendations(&filter, Metric::Execution, 10)
            .unwrap();
        let second = engine
            .get_recommendations(&filter, Metric::Execution, 10)
            .unwrap();
        assert_eq!(first, second);

        // Higher aversion outranks lower under the execution metric; the
        // two equal-aversion candidates tie-break on shorter estimate
        let ids: Vec<&str> = first.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["todo-a", "todo-c", "todo-b"]);
    }

    #[test]
    fn test_recommendations_degrade_for_unscorable_metric() {
        let (engine, _) = engine_with(sample_records());
        // Pending candidates have no relief yet, so nothing is rankable
        let ranked = engine
            .get_recommendations(&CandidateFilter::default(), Metric::ReliefEffort, 10)
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_composite_equal_weights_is_mean_of_present() {
        let (engine, _) = engine_with(sample_records());
        let result = engine
            .compute_composite(&Scope::Global, "user-1", DEFAULT_COMPOSITE_SCORE)
            .unwrap();

        assert!(!result.undetermined);
        assert!((0.0..=100.0).contains(&result.value));
        let mean: f64 =
            result.components.values().sum::<f64>() / result.components.len() as f64;
        assert!((result.value - mean).abs() < 1e-9);
        assert!(!result.engine_instance_id.is_empty());
    }

    #[test]
    fn test_composite_empty_scope_is_undetermined() {
        let (engine, _) = engine_with(sample_records());
        let result = engine
            .compute_composite(
                &Scope::Category("errands".to_string()),
                "user-1",
                DEFAULT_COMPOSITE_SCORE,
            )
            .unwrap();
        assert!(result.undetermined);
        assert_eq!(result.value, NEUTRAL_SCORE);
    }

    #[test]
    fn test_weight_vector_defaults_and_rejection() {
        let (engine, _) = engine_with(sample_records());

        let defaults = engine.get_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE);
        assert_eq!(defaults.weights.len(), Metric::ALL.len());

        let mut bad = BTreeMap::new();
        bad.insert("charisma".to_string(), 1.0);
        assert!(engine
            .set_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE, bad)
            .is_err());

        // Original vector unchanged after rejection
        let unchanged = engine.get_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE);
        assert_eq!(unchanged.weights, defaults.weights);

        let mut good = BTreeMap::new();
        good.insert("productivity".to_string(), 2.0);
        good.insert("grit".to_string(), 1.0);
        let stored = engine
            .set_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE, good.clone())
            .unwrap();
        assert_eq!(stored.weights, good);
        assert_eq!(
            engine
                .get_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE)
                .weights,
            good
        );
    }

    #[test]
    fn test_weight_table_round_trip() {
        let (engine, _) = engine_with(sample_records());
        let mut weights = BTreeMap::new();
        weights.insert("execution".to_string(), 3.0);
        engine
            .set_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE, weights.clone())
            .unwrap();

        let saved = engine.save_weights().unwrap();

        let (other, _) = engine_with(sample_records());
        other.load_weights(&saved).unwrap();
        assert_eq!(
            other
                .get_weight_vector("user-1", DEFAULT_COMPOSITE_SCORE)
                .weights,
            weights
        );
    }

    #[test]
    fn test_zero_history_aversion_falls_back_to_neutral_improvement() {
        // Single completion: template baseline is undefined (below minimum
        // samples), improvement term falls back, no panic
        let records = vec![completed(
            "only",
            "tmpl-new",
            "focus",
            day(15, 12),
            30,
            serde_json::json!({ "completion_pct": 100.0, "relief": 60.0 }),
            serde_json::json!({ "estimated_minutes": 60, "initial_aversion": 80.0 }),
        )];
        let (engine, _) = engine_with(records);

        let score = engine.compute_score(Metric::Aversion, "only").unwrap();
        assert!((0.0..=100.0).contains(&score));

        let baseline = engine
            .compute_aggregate(
                BaselineMetric::InitialAversion,
                &Scope::Template("tmpl-new".to_string()),
                30,
            )
            .unwrap();
        assert!(!baseline.is_defined());
    }
}
