//! Shared data contracts between the extraction adapter, the fusion engine,
//! the persistence gateway and the batch orchestrator.
//!
//! All maps are `BTreeMap` so that serialized records are byte-for-byte
//! reproducible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Field values and schema
// ============================================================================

/// Reference to one photograph of an item (path, URL or storage key)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Typed value of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Measurement (weight, dimensions) in the field's canonical unit
    Numeric(f64),
    /// Enumerable label such as color or cut
    Categorical(String),
    /// Free-form label text
    Text(String),
}

impl FieldValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldValue::Numeric(_) => ValueType::Numeric,
            FieldValue::Categorical(_) => ValueType::Categorical,
            FieldValue::Text(_) => ValueType::Text,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Categorical(s) | FieldValue::Text(s) => Some(s),
            FieldValue::Numeric(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Numeric(n) => write!(f, "{}", n),
            FieldValue::Categorical(s) | FieldValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Numeric,
    Categorical,
    Text,
}

/// Importance class of a field for overall confidence weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Physically verifiable against an in-frame reference (weight, dimensions)
    Measurable,
    /// Subjective or descriptive (color, cut, labels)
    Descriptive,
}

/// One known attribute of the catalog schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
    pub class: FieldClass,
    /// Canonical unit for numeric fields
    #[serde(default)]
    pub unit: Option<String>,
}

impl FieldSpec {
    pub fn numeric(name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Numeric,
            class: FieldClass::Measurable,
            unit: Some(unit.to_string()),
        }
    }

    pub fn categorical(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Categorical,
            class: FieldClass::Descriptive,
            unit: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Text,
            class: FieldClass::Descriptive,
            unit: None,
        }
    }
}

/// Fixed set of fields the extraction adapter is asked for and the fusion
/// engine accepts. Order is the order fields are requested and reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::new(vec![
            FieldSpec::numeric("weight", "kg"),
            FieldSpec::numeric("length", "cm"),
            FieldSpec::numeric("width", "cm"),
            FieldSpec::numeric("height", "cm"),
            FieldSpec::categorical("color"),
            FieldSpec::categorical("cut"),
            FieldSpec::text("label_text"),
        ])
    }
}

// ============================================================================
// Extraction adapter output
// ============================================================================

/// One field as reported for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: Option<FieldValue>,
    /// Confidence score [0.0, 1.0]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ExtractedField {
    pub fn new(value: FieldValue, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence,
            unit: None,
        }
    }

    pub fn null() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Image quality as judged by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySignal {
    /// Quality score [0.0, 1.0]
    pub score: f64,
    /// Blurry, occluded or otherwise unusable image
    #[serde(default)]
    pub low_quality: bool,
}

/// Result of analyzing one image of one item
///
/// Immutable audit record; one per (item, image) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    pub item_id: String,
    pub image_ref: ImageRef,
    pub fields: BTreeMap<String, ExtractedField>,
    #[serde(default)]
    pub free_text: Option<String>,
    #[serde(default)]
    pub quality: Option<QualitySignal>,
    /// Billed cost of the adapter call
    pub cost: f64,
    /// Adapter call latency
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RawExtraction {
    /// Number of fields with a non-null value
    pub fn non_null_field_count(&self) -> usize {
        self.fields.values().filter(|f| f.value.is_some()).count()
    }
}

// ============================================================================
// Fusion output
// ============================================================================

/// Resolved value of one field with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedField {
    pub value: Option<FieldValue>,
    pub confidence: f64,
    pub source_image_ref: Option<ImageRef>,
    pub is_conflicted: bool,
}

impl FusedField {
    pub fn null() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            source_image_ref: None,
            is_conflicted: false,
        }
    }
}

/// One disagreeing observation kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub value: FieldValue,
    pub confidence: f64,
    pub source_image_ref: ImageRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field_name: String,
    pub candidates: Vec<Candidate>,
}

/// Single fused attribute record for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub item_id: String,
    pub fields: BTreeMap<String, FusedField>,
    /// Conflicted fields in schema order
    pub conflicts: Vec<FieldConflict>,
    pub primary_image_ref: ImageRef,
    pub overall_confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl ConsolidatedRecord {
    pub fn field(&self, name: &str) -> Option<&FusedField> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).and_then(|f| f.value.as_ref())
    }

    pub fn conflict(&self, name: &str) -> Option<&FieldConflict> {
        self.conflicts.iter().find(|c| c.field_name == name)
    }
}

// ============================================================================
// Checkpoint
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network, rate limit, timeout: retried by the next run
    Transient,
    /// Malformed or unsupported input: not retried automatically
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: String,
    pub kind: FailureKind,
    /// Number of runs that attempted the item and failed
    pub attempts: u32,
}

/// Durable progress of a batch job, reloaded at the start of every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub completed: BTreeSet<String>,
    pub failed: BTreeMap<String, FailureRecord>,
    pub wave_index: u64,
    pub total_cost: f64,
    pub total_latency_ms: u64,
    pub total_elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_serialization_is_tagged() {
        let json = serde_json::to_string(&FieldValue::Numeric(2.5)).unwrap();
        assert_eq!(json, r#"{"type":"numeric","value":2.5}"#);

        let back: FieldValue =
            serde_json::from_str(r#"{"type":"categorical","value":"green"}"#).unwrap();
        assert_eq!(back, FieldValue::Categorical("green".to_string()));
    }

    #[test]
    fn test_default_schema_classes() {
        let schema = FieldSchema::default();
        assert_eq!(schema.get("weight").unwrap().class, FieldClass::Measurable);
        assert_eq!(schema.get("weight").unwrap().unit.as_deref(), Some("kg"));
        assert_eq!(schema.get("color").unwrap().class, FieldClass::Descriptive);
        assert_eq!(schema.get("label_text").unwrap().value_type, ValueType::Text);
        assert!(schema.get("price").is_none());
    }

    #[test]
    fn test_non_null_field_count() {
        let mut fields = BTreeMap::new();
        fields.insert("weight".to_string(), ExtractedField::new(FieldValue::Numeric(1.0), 0.9));
        fields.insert("color".to_string(), ExtractedField::null());

        let raw = RawExtraction {
            item_id: "item-1".to_string(),
            image_ref: ImageRef::from("img-0"),
            fields,
            free_text: None,
            quality: None,
            cost: 0.01,
            latency_ms: 120,
            created_at: Utc::now(),
        };
        assert_eq!(raw.non_null_field_count(), 1);
    }
}
