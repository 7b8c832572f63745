//! Per-field resolution
//!
//! Algorithm for one field:
//! 1. Collect every non-null observation across extractions (image order)
//! 2. None: null field, confidence 0
//! 3. All equivalent: keep the value, confidence = max observed, not conflicted
//! 4. Disagreement: every observation becomes a conflict candidate, then the
//!    winner is chosen by confidence → source completeness → image index

use super::equivalence::all_equivalent;
use super::input::ValidatedExtraction;
use crate::types::{Candidate, FieldConflict, FieldValue, FusedField, ImageRef};
use std::cmp::Ordering;

/// One non-null value of a field as reported by one image
#[derive(Debug, Clone)]
struct Observation<'a> {
    value: &'a FieldValue,
    confidence: f64,
    index: usize,
    completeness: usize,
    image_ref: &'a ImageRef,
}

impl Observation<'_> {
    /// Total order used both for conflict winners and for picking the source
    /// among equivalent values. Greater is better.
    fn rank(&self, other: &Self) -> Ordering {
        self.confidence
            .total_cmp(&other.confidence)
            .then(self.completeness.cmp(&other.completeness))
            .then(other.index.cmp(&self.index))
    }
}

/// Outcome of resolving one field
#[derive(Debug, Clone)]
pub(crate) struct FieldResolution {
    pub fused: FusedField,
    pub conflict: Option<FieldConflict>,
}

pub(crate) fn resolve_field(
    field_name: &str,
    extractions: &[ValidatedExtraction],
    tolerance: f64,
) -> FieldResolution {
    let observations: Vec<Observation<'_>> = extractions
        .iter()
        .filter_map(|e| {
            e.fields.get(field_name).map(|(value, confidence)| Observation {
                value,
                confidence: *confidence,
                index: e.index,
                completeness: e.completeness(),
                image_ref: &e.image_ref,
            })
        })
        .collect();

    let Some(best) = observations.iter().max_by(|a, b| a.rank(b)) else {
        return FieldResolution {
            fused: FusedField::null(),
            conflict: None,
        };
    };

    let agreed = all_equivalent(observations.iter().map(|o| o.value), tolerance);

    let fused = FusedField {
        value: Some(best.value.clone()),
        confidence: best.confidence,
        source_image_ref: Some(best.image_ref.clone()),
        is_conflicted: !agreed,
    };

    if agreed {
        tracing::debug!(
            field = field_name,
            value = %best.value,
            confidence = best.confidence,
            observations = observations.len(),
            "Field agreed across images"
        );
        return FieldResolution {
            fused,
            conflict: None,
        };
    }

    let candidates = observations
        .iter()
        .map(|o| Candidate {
            value: o.value.clone(),
            confidence: o.confidence,
            source_image_ref: o.image_ref.clone(),
        })
        .collect();

    tracing::debug!(
        field = field_name,
        value = %best.value,
        confidence = best.confidence,
        source = %best.image_ref,
        candidates = observations.len(),
        "Field conflicted, highest-ranked candidate selected"
    );

    FieldResolution {
        fused,
        conflict: Some(FieldConflict {
            field_name: field_name.to_string(),
            candidates,
        }),
    }
}
