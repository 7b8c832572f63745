//! Value equivalence rules
//!
//! - Numeric: equal within a relative tolerance of the larger magnitude
//! - Categorical / text: equal after label normalization

use crate::types::FieldValue;

/// Absolute slack absorbing floating point noise around the tolerance edge
const FLOAT_SLACK: f64 = 1e-12;

/// Normalize a label for comparison: Unicode lowercase, `-`/`_` as spaces,
/// collapsed whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `|a - b| <= tolerance * max(|a|, |b|)`
pub fn numbers_equivalent(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs());
    (a - b).abs() <= tolerance * scale + FLOAT_SLACK
}

/// Compare two values of the same field
pub fn values_equivalent(a: &FieldValue, b: &FieldValue, tolerance: f64) -> bool {
    match (a, b) {
        (FieldValue::Numeric(x), FieldValue::Numeric(y)) => numbers_equivalent(*x, *y, tolerance),
        (FieldValue::Numeric(_), _) | (_, FieldValue::Numeric(_)) => false,
        (x, y) => match (x.as_str(), y.as_str()) {
            (Some(x), Some(y)) => normalize_label(x) == normalize_label(y),
            _ => false,
        },
    }
}

/// Whether every value in the slice is equivalent to every other.
///
/// Numeric values are checked between the extremes, so a chain of small
/// steps (1.00, 1.04, 1.08) is not collapsed into one value.
pub fn all_equivalent<'a, I>(values: I, tolerance: f64) -> bool
where
    I: IntoIterator<Item = &'a FieldValue>,
{
    let values: Vec<&FieldValue> = values.into_iter().collect();
    let Some(first) = values.first() else {
        return true;
    };

    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
    if numbers.len() == values.len() {
        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        return numbers_equivalent(min, max, tolerance);
    }

    values
        .iter()
        .skip(1)
        .all(|v| values_equivalent(first, v, tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> FieldValue {
        FieldValue::Numeric(n)
    }

    fn cat(s: &str) -> FieldValue {
        FieldValue::Categorical(s.to_string())
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Dark-Green "), "dark green");
        assert_eq!(normalize_label("DARK_GREEN"), "dark green");
        assert_eq!(normalize_label("Émeraude"), "émeraude");
    }

    #[test]
    fn test_numbers_within_tolerance() {
        assert!(numbers_equivalent(1.00, 1.03, 0.05));
        assert!(numbers_equivalent(1.00, 1.05, 0.05));
        assert!(!numbers_equivalent(1.00, 1.50, 0.05));
        assert!(numbers_equivalent(0.0, 0.0, 0.05));
        assert!(!numbers_equivalent(0.0, 0.001, 0.05));
    }

    #[test]
    fn test_zero_tolerance_requires_exact_match() {
        assert!(numbers_equivalent(2.0, 2.0, 0.0));
        assert!(!numbers_equivalent(2.0, 2.0001, 0.0));
    }

    #[test]
    fn test_categorical_case_insensitive() {
        assert!(values_equivalent(&cat("Green"), &cat("green"), 0.05));
        assert!(!values_equivalent(&cat("green"), &cat("dark green"), 0.05));
        assert!(values_equivalent(
            &cat("Navy"),
            &FieldValue::Text("navy".to_string()),
            0.05
        ));
    }

    #[test]
    fn test_numeric_never_equals_label() {
        assert!(!values_equivalent(&num(1.0), &cat("1"), 0.05));
    }

    #[test]
    fn test_all_equivalent_checks_extremes() {
        let chain = [num(1.00), num(1.04), num(1.08)];
        assert!(!all_equivalent(chain.iter(), 0.05));

        let close = [num(2.0), num(2.02), num(1.99)];
        assert!(all_equivalent(close.iter(), 0.05));

        let labels = [cat("green"), cat("GREEN"), cat("dark green")];
        assert!(!all_equivalent(labels.iter(), 0.05));
    }
}
