//! Attribute fusion engine
//!
//! Reconciles N independent per-image extractions of one item into a single
//! [`ConsolidatedRecord`] with per-field confidence, provenance and explicit
//! conflict reporting.
//!
//! # Pipeline
//!
//! 1. Input validation ([`input`]): clamp confidences, coerce types, convert units
//! 2. Per-field resolution ([`resolver`]): agreement or conflict + winner
//! 3. Overall confidence: class-weighted mean over resolved fields
//! 4. Primary image selection ([`primary_image`])
//!
//! `fuse` is a pure function of its input: identical input serializes to an
//! identical record.

pub mod equivalence;
mod input;
mod primary_image;
mod resolver;
pub mod units;

use crate::types::{ConsolidatedRecord, FieldClass, FieldSchema, FusedField, RawExtraction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Fusion engine errors
#[derive(Debug, Error, PartialEq)]
pub enum FusionError {
    /// `fuse` was called with an empty extraction list
    #[error("No input data: at least one raw extraction is required")]
    NoInputData,
}

/// Tunable parameters of the fusion engine (`[fusion]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Relative tolerance for numeric equivalence (0.05 = 5%)
    pub numeric_tolerance: f64,
    /// Overall-confidence weight of measurable fields
    pub measurable_weight: f64,
    /// Overall-confidence weight of descriptive fields
    pub descriptive_weight: f64,
    /// Score subtracted from images flagged low-quality
    pub low_quality_penalty: f64,
    /// Minimum confidence of a reported non-null value
    pub confidence_floor: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.05,
            measurable_weight: 2.0,
            descriptive_weight: 1.0,
            low_quality_penalty: 1.0,
            confidence_floor: 0.01,
        }
    }
}

impl FusionConfig {
    /// Check value ranges; returns a description of the first violation
    pub fn validate(&self) -> Result<(), String> {
        if !(self.numeric_tolerance.is_finite() && self.numeric_tolerance >= 0.0) {
            return Err(format!(
                "fusion.numeric_tolerance must be >= 0, got {}",
                self.numeric_tolerance
            ));
        }
        if !(self.measurable_weight.is_finite() && self.measurable_weight > 0.0) {
            return Err(format!(
                "fusion.measurable_weight must be > 0, got {}",
                self.measurable_weight
            ));
        }
        if !(self.descriptive_weight.is_finite() && self.descriptive_weight > 0.0) {
            return Err(format!(
                "fusion.descriptive_weight must be > 0, got {}",
                self.descriptive_weight
            ));
        }
        if !(self.low_quality_penalty.is_finite() && self.low_quality_penalty >= 0.0) {
            return Err(format!(
                "fusion.low_quality_penalty must be >= 0, got {}",
                self.low_quality_penalty
            ));
        }
        if !(self.confidence_floor > 0.0 && self.confidence_floor <= 1.0) {
            return Err(format!(
                "fusion.confidence_floor must be in (0, 1], got {}",
                self.confidence_floor
            ));
        }
        Ok(())
    }

    fn weight_of(&self, class: FieldClass) -> f64 {
        match class {
            FieldClass::Measurable => self.measurable_weight,
            FieldClass::Descriptive => self.descriptive_weight,
        }
    }
}

/// Multi-image attribute fusion engine
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
    schema: FieldSchema,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, schema: FieldSchema) -> Self {
        Self { config, schema }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Fuse per-image extractions of one item into a consolidated record.
    ///
    /// The image ordering index of an extraction is its position in `raw`.
    pub fn fuse(&self, raw: &[RawExtraction]) -> Result<ConsolidatedRecord, FusionError> {
        let first = raw.first().ok_or(FusionError::NoInputData)?;
        let item_id = first.item_id.clone();

        if let Some(other) = raw.iter().find(|r| r.item_id != item_id) {
            tracing::warn!(
                item_id = %item_id,
                other_item_id = %other.item_id,
                "Extractions for different items passed to one fusion call"
            );
        }

        let extractions = input::validate(raw, &self.schema, &self.config);
        let tolerance = self.config.numeric_tolerance;

        let mut fields = BTreeMap::new();
        let mut conflicts = Vec::new();
        for spec in &self.schema.fields {
            let resolution = resolver::resolve_field(&spec.name, &extractions, tolerance);
            if let Some(conflict) = resolution.conflict {
                conflicts.push(conflict);
            }
            fields.insert(spec.name.clone(), resolution.fused);
        }

        let overall_confidence = self.overall_confidence(&fields);

        let primary_image_ref = primary_image::select_primary_image(
            &extractions,
            &fields,
            tolerance,
            self.config.low_quality_penalty,
        )
        .unwrap_or_else(|| first.image_ref.clone());

        let created_at = raw
            .iter()
            .map(|r| r.created_at)
            .max()
            .unwrap_or(first.created_at);

        tracing::info!(
            item_id = %item_id,
            images = raw.len(),
            resolved = fields.values().filter(|f| f.value.is_some()).count(),
            conflicts = conflicts.len(),
            overall_confidence,
            primary_image = %primary_image_ref,
            "Fused item attributes"
        );

        Ok(ConsolidatedRecord {
            item_id,
            fields,
            conflicts,
            primary_image_ref,
            overall_confidence,
            created_at,
        })
    }

    /// Class-weighted mean confidence of fields that resolved to a value
    fn overall_confidence(&self, fields: &BTreeMap<String, FusedField>) -> f64 {
        let (weighted, total_weight) = self
            .schema
            .fields
            .iter()
            .filter_map(|spec| {
                let field = fields.get(&spec.name)?;
                field.value.as_ref()?;
                Some((field.confidence, self.config.weight_of(spec.class)))
            })
            .fold((0.0, 0.0), |(sum, weights), (confidence, weight)| {
                (sum + confidence * weight, weights + weight)
            });

        if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        }
    }
}
