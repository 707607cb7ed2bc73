//! Record normalization
//!
//! This module converts heterogeneous raw instance records into the flat,
//! typed normalized table the rest of the engine operates on:
//! - Defensive payload handling (malformed payloads never abort a batch)
//! - Dedup by instance id, keeping the most recently updated version
//! - Derived scalar columns via the declared extraction policy table
//! - Quality flags and data-quality logging

use crate::schema::extract::{extraction_policies, PayloadSide, ScalarField};
use crate::schema::raw_record::{AttrMap, AttrValue, RawRecord};
use crate::types::{ActivityInstance, NormalizedTable, QualityFlag};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Normalizer for converting raw records into the typed table
pub struct RecordNormalizer;

impl RecordNormalizer {
    /// Normalize a batch of raw records.
    ///
    /// Never fails: malformed payloads degrade to empty attribute maps with
    /// quality flags, and duplicate ids collapse to the latest version. The
    /// output is an append-only snapshot; the normalizer holds no state.
    pub fn normalize(records: &[RawRecord], now: DateTime<Utc>) -> NormalizedTable {
        let mut latest: HashMap<&str, &RawRecord> = HashMap::new();
        for record in records {
            match latest.get(record.instance_id.as_str()) {
                Some(existing) if existing.updated_at >= record.updated_at => {
                    tracing::debug!(
                        instance_id = %record.instance_id,
                        "Dropping superseded duplicate record"
                    );
                }
                _ => {
                    latest.insert(record.instance_id.as_str(), record);
                }
            }
        }

        let mut quality_event_count = 0;
        let mut rows: Vec<ActivityInstance> = latest
            .into_values()
            .map(|record| {
                let row = normalize_record(record);
                quality_event_count += row
                    .quality_flags
                    .iter()
                    .filter(|f| {
                        matches!(
                            f,
                            QualityFlag::MalformedExpectedPayload
                                | QualityFlag::MalformedObservedPayload
                        )
                    })
                    .count();
                row
            })
            .collect();

        // Deterministic row order regardless of input/hash order
        rows.sort_by(|a, b| a.id.cmp(&b.id));

        NormalizedTable::new(rows, now, quality_event_count)
    }
}

/// Normalize a single raw record into a typed row
fn normalize_record(record: &RawRecord) -> ActivityInstance {
    let mut quality_flags = Vec::new();

    let expected = parse_payload(
        record.expected.as_ref(),
        &record.instance_id,
        "expected",
        QualityFlag::MalformedExpectedPayload,
        &mut quality_flags,
    );
    let observed = parse_payload(
        record.observed.as_ref(),
        &record.instance_id,
        "observed",
        QualityFlag::MalformedObservedPayload,
        &mut quality_flags,
    );

    let mut scalars: HashMap<ScalarField, f64> = HashMap::new();
    for policy in extraction_policies() {
        let attrs = match policy.side {
            PayloadSide::Expected => &expected,
            PayloadSide::Observed => &observed,
        };
        if let Some(value) = policy.extract(attrs) {
            scalars.insert(policy.field, value);
        }
    }

    let elapsed_minutes = elapsed_minutes(record);
    let start_delay_minutes = start_delay_minutes(record);

    if scalars.get(&ScalarField::EstimatedMinutes).is_none() {
        quality_flags.push(QualityFlag::MissingEstimate);
    }
    if record.completed_at.is_some() && scalars.get(&ScalarField::CompletionPct).is_none() {
        quality_flags.push(QualityFlag::MissingCompletion);
    }
    if record.created_at.is_none() && record.started_at.is_none() && record.completed_at.is_none()
    {
        quality_flags.push(QualityFlag::MissingLifecycleTimestamps);
    }

    ActivityInstance {
        id: record.instance_id.clone(),
        template_id: record.template_id.clone(),
        category: record.category.clone(),
        created_at: record.created_at,
        started_at: record.started_at,
        completed_at: record.completed_at,
        cancelled_at: record.cancelled_at,
        updated_at: record.updated_at,
        estimated_minutes: scalars.get(&ScalarField::EstimatedMinutes).copied(),
        anticipated_relief: scalars.get(&ScalarField::AnticipatedRelief).copied(),
        initial_aversion: scalars.get(&ScalarField::InitialAversion).copied(),
        cognitive_load: scalars.get(&ScalarField::CognitiveLoad).copied(),
        completion_pct: scalars.get(&ScalarField::CompletionPct).copied(),
        relief: scalars.get(&ScalarField::Relief).copied(),
        final_aversion: scalars.get(&ScalarField::FinalAversion).copied(),
        elapsed_minutes,
        start_delay_minutes,
        quality_flags,
    }
}

/// Parse a nested payload into a typed attribute map.
///
/// A missing payload is normal (in-flight instances have no `observed` yet).
/// A payload that is present but not a JSON object, or an entry that is not
/// a scalar, is a data-quality event: logged, flagged, and replaced with an
/// empty map / skipped entry rather than failing the record.
fn parse_payload(
    payload: Option<&serde_json::Value>,
    instance_id: &str,
    side: &str,
    malformed_flag: QualityFlag,
    quality_flags: &mut Vec<QualityFlag>,
) -> AttrMap {
    let Some(value) = payload else {
        return AttrMap::new();
    };

    let Some(object) = value.as_object() else {
        tracing::warn!(
            instance_id = instance_id,
            payload = side,
            "Malformed attribute payload (not a JSON object), substituting empty map"
        );
        quality_flags.push(malformed_flag);
        return AttrMap::new();
    };

    let mut attrs = AttrMap::new();
    let mut dropped = 0usize;
    for (key, entry) in object {
        match to_attr_value(entry) {
            Some(attr) => {
                attrs.insert(key.clone(), attr);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::warn!(
            instance_id = instance_id,
            payload = side,
            dropped_entries = dropped,
            "Dropped non-scalar attribute entries"
        );
        quality_flags.push(malformed_flag);
    }

    attrs
}

fn to_attr_value(value: &serde_json::Value) -> Option<AttrValue> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number),
        serde_json::Value::String(s) => Some(AttrValue::String(s.clone())),
        serde_json::Value::Bool(b) => Some(AttrValue::Boolean(*b)),
        _ => None,
    }
}

/// Elapsed working duration in minutes, from lifecycle timestamps
fn elapsed_minutes(record: &RawRecord) -> Option<f64> {
    let end = record.completed_at?;
    let start = record.started_at.or(record.created_at)?;
    let seconds = (end - start).num_seconds();
    if seconds < 0 {
        tracing::warn!(
            instance_id = %record.instance_id,
            "Completion precedes start, dropping elapsed duration"
        );
        return None;
    }
    Some(seconds as f64 / 60.0)
}

/// Delay between planning and starting, in minutes
fn start_delay_minutes(record: &RawRecord) -> Option<f64> {
    let started = record.started_at?;
    let created = record.created_at?;
    let seconds = (started - created).num_seconds();
    if seconds < 0 {
        return None;
    }
    Some(seconds as f64 / 60.0)
}
