//! Input boundary of the fusion engine
//!
//! Raw adapter output is loosely shaped: confidences can be out of range,
//! fields can be unknown or carry the wrong variant, numbers can come in
//! arbitrary units. Everything is coerced onto the schema here so the
//! resolution algorithm only sees clean observations. Nothing in this module
//! fails; unusable values are dropped and logged.

use super::units;
use super::FusionConfig;
use crate::types::{ExtractedField, FieldSchema, FieldSpec, FieldValue, ImageRef, QualitySignal, RawExtraction, ValueType};
use std::collections::BTreeMap;

/// One extraction after validation against the schema
#[derive(Debug, Clone)]
pub(crate) struct ValidatedExtraction {
    /// Image ordering index (position in the input list)
    pub index: usize,
    pub image_ref: ImageRef,
    pub quality: Option<QualitySignal>,
    /// Non-null schema fields with clamped confidence
    pub fields: BTreeMap<String, (FieldValue, f64)>,
}

impl ValidatedExtraction {
    /// Number of non-null schema fields (completeness tie-breaker)
    pub fn completeness(&self) -> usize {
        self.fields.len()
    }
}

pub(crate) fn validate(
    raw: &[RawExtraction],
    schema: &FieldSchema,
    config: &FusionConfig,
) -> Vec<ValidatedExtraction> {
    raw.iter()
        .enumerate()
        .map(|(index, extraction)| {
            let mut fields = BTreeMap::new();

            for (name, field) in &extraction.fields {
                let Some(spec) = schema.get(name) else {
                    tracing::debug!(
                        item_id = %extraction.item_id,
                        image = %extraction.image_ref,
                        field = %name,
                        "Ignoring field outside schema"
                    );
                    continue;
                };

                let Some(value) = coerce(field, spec) else {
                    if field.value.is_some() {
                        tracing::debug!(
                            item_id = %extraction.item_id,
                            image = %extraction.image_ref,
                            field = %name,
                            "Dropping value that does not fit the field type"
                        );
                    }
                    continue;
                };

                fields.insert(
                    name.clone(),
                    (value, clamp_confidence(field.confidence, config.confidence_floor)),
                );
            }

            ValidatedExtraction {
                index,
                image_ref: extraction.image_ref.clone(),
                quality: extraction.quality.map(|q| QualitySignal {
                    score: clamp_unit(q.score),
                    low_quality: q.low_quality,
                }),
                fields,
            }
        })
        .collect()
}

/// Clamp to [floor, 1.0]; a reported non-null value always carries some weight
fn clamp_confidence(confidence: f64, floor: f64) -> f64 {
    clamp_unit(confidence).max(floor)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Coerce a reported value onto the field's declared type
fn coerce(field: &ExtractedField, spec: &FieldSpec) -> Option<FieldValue> {
    let value = field.value.as_ref()?;

    match spec.value_type {
        ValueType::Numeric => {
            let (number, unit) = match value {
                FieldValue::Numeric(n) => (*n, field.unit.clone()),
                FieldValue::Categorical(s) | FieldValue::Text(s) => {
                    let (n, parsed_unit) = units::parse_quantity(s)?;
                    (n, parsed_unit.or_else(|| field.unit.clone()))
                }
            };
            if !number.is_finite() {
                return None;
            }
            Some(FieldValue::Numeric(to_canonical_unit(number, unit.as_deref(), spec)))
        }
        ValueType::Categorical | ValueType::Text => {
            let text = match value {
                FieldValue::Numeric(n) if n.is_finite() => n.to_string(),
                FieldValue::Numeric(_) => return None,
                FieldValue::Categorical(s) | FieldValue::Text(s) => s.trim().to_string(),
            };
            if text.is_empty() {
                return None;
            }
            Some(match spec.value_type {
                ValueType::Categorical => FieldValue::Categorical(text),
                _ => FieldValue::Text(text),
            })
        }
    }
}

fn to_canonical_unit(value: f64, unit: Option<&str>, spec: &FieldSpec) -> f64 {
    match (unit, spec.unit.as_deref()) {
        (Some(from), Some(to)) => units::convert(value, from, to).unwrap_or_else(|| {
            tracing::debug!(field = %spec.name, from, to, "Unknown unit conversion, keeping raw value");
            value
        }),
        _ => value,
    }
}
