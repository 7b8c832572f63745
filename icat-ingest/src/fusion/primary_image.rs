//! Primary image selection
//!
//! Score per image = fields agreeing with the resolved record
//!                 + adapter quality score
//!                 - penalty when flagged low-quality.
//! Highest score wins; ties go to the lowest image index.

use super::equivalence::values_equivalent;
use super::input::ValidatedExtraction;
use crate::types::{FusedField, ImageRef};
use std::collections::BTreeMap;

pub(crate) fn score_image(
    extraction: &ValidatedExtraction,
    fused: &BTreeMap<String, FusedField>,
    tolerance: f64,
    low_quality_penalty: f64,
) -> f64 {
    let matches = fused
        .iter()
        .filter(|(name, field)| {
            match (field.value.as_ref(), extraction.fields.get(name.as_str())) {
                (Some(resolved), Some((own, _))) => values_equivalent(resolved, own, tolerance),
                _ => false,
            }
        })
        .count();

    let (quality, penalty) = match extraction.quality {
        Some(q) => (q.score, if q.low_quality { low_quality_penalty } else { 0.0 }),
        None => (0.0, 0.0),
    };

    matches as f64 + quality - penalty
}

/// Pick the primary image. `extractions` must be non-empty.
pub(crate) fn select_primary_image(
    extractions: &[ValidatedExtraction],
    fused: &BTreeMap<String, FusedField>,
    tolerance: f64,
    low_quality_penalty: f64,
) -> Option<ImageRef> {
    let mut best: Option<(f64, &ValidatedExtraction)> = None;

    for extraction in extractions {
        let score = score_image(extraction, fused, tolerance, low_quality_penalty);
        tracing::trace!(image = %extraction.image_ref, index = extraction.index, score, "Primary image score");

        // Strictly greater: earlier images keep ties
        match best {
            Some((best_score, _)) if score <= best_score => {}
            _ => best = Some((score, extraction)),
        }
    }

    best.map(|(_, e)| e.image_ref.clone())
}
