//! task.instance_record.v1 schema definition
//!
//! The wire shape the external instance store delivers. Each record carries
//! two nested attribute payloads:
//! - `expected`: values supplied at planning time (effort, relief, estimate)
//! - `observed`: values supplied at completion time (plus completion percentage)
//!
//! Payloads are kept as raw JSON here; the engine never trusts their shape.
//! Interpretation happens once, in the Record Normalizer, through the
//! extraction policy table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current schema version
pub const SCHEMA_VERSION: &str = "task.instance_record.v1";

/// Flexible attribute value (supports the types planning forms produce)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Numeric coercion that also accepts numeric strings.
    ///
    /// Planning forms occasionally deliver `"45"` where `45` was meant; the
    /// normalizer treats those as numbers rather than dropping the field.
    /// Non-finite results are rejected.
    pub fn as_f64_lenient(&self) -> Option<f64> {
        let value = match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Integer(i) => Some(*i as f64),
            AttrValue::String(s) => s.trim().parse::<f64>().ok(),
            AttrValue::Boolean(_) => None,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Number(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Integer(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

/// Typed attribute map, produced by defensive payload parsing
pub type AttrMap = HashMap<String, AttrValue>;

/// The main task.instance_record.v1 schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Schema version identifier
    pub schema_version: String,
    /// Unique instance identifier
    pub instance_id: String,
    /// Parent activity-template identifier
    pub template_id: String,
    /// Category/type tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// When the instance was planned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When work started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When work completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the instance was cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Last mutation time, used for dedup (latest wins)
    pub updated_at: DateTime<Utc>,
    /// Planning-time attribute payload (possibly malformed/partial)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
    /// Completion-time attribute payload (possibly malformed/partial)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<serde_json::Value>,
}

impl RawRecord {
    /// Create a new record with the minimum required fields
    pub fn new(
        instance_id: impl Into<String>,
        template_id: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        RawRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            instance_id: instance_id.into(),
            template_id: template_id.into(),
            category: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at,
            expected: None,
            observed: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_expected(mut self, expected: serde_json::Value) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_observed(mut self, observed: serde_json::Value) -> Self {
        self.observed = Some(observed);
        self
    }

    /// Validate the record schema
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(RecordError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.instance_id.is_empty() {
            return Err(RecordError::EmptyInstanceId);
        }

        Ok(())
    }
}

/// Validation errors for raw records
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Record has an empty instance_id")]
    EmptyInstanceId,
}
