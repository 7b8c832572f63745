//! Unit normalization for numeric measurements
//!
//! The vision service reports units free-form ("g", "grams", "in", "\"").
//! Values are converted to the schema's canonical unit before comparison so
//! that 1500 g and 1.5 kg are treated as the same measurement.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Length,
}

/// Dimension and factor to the base unit (kg for mass, m for length)
fn lookup(unit: &str) -> Option<(Dimension, f64)> {
    let unit = unit.trim().to_lowercase();
    let entry = match unit.as_str() {
        "mg" | "milligram" | "milligrams" => (Dimension::Mass, 1e-6),
        "g" | "gr" | "gram" | "grams" => (Dimension::Mass, 1e-3),
        "kg" | "kgs" | "kilo" | "kilos" | "kilogram" | "kilograms" => (Dimension::Mass, 1.0),
        "oz" | "ounce" | "ounces" => (Dimension::Mass, 0.028_349_523_125),
        "lb" | "lbs" | "pound" | "pounds" => (Dimension::Mass, 0.453_592_37),
        "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => {
            (Dimension::Length, 1e-3)
        }
        "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => {
            (Dimension::Length, 1e-2)
        }
        "m" | "meter" | "meters" | "metre" | "metres" => (Dimension::Length, 1.0),
        "in" | "inch" | "inches" | "\"" => (Dimension::Length, 0.0254),
        "ft" | "foot" | "feet" | "'" => (Dimension::Length, 0.3048),
        _ => return None,
    };
    Some(entry)
}

/// Whether `unit` is a recognized unit string
pub fn is_known_unit(unit: &str) -> bool {
    lookup(unit).is_some()
}

/// Convert `value` from `from` to `to`.
///
/// Returns `None` when either unit is unknown or the dimensions differ.
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    let (from_dim, from_factor) = lookup(from)?;
    let (to_dim, to_factor) = lookup(to)?;
    if from_dim != to_dim {
        return None;
    }
    Some(value * from_factor / to_factor)
}

/// Split "2.5 kg" / "2.5kg" into number and unit.
pub fn parse_quantity(text: &str) -> Option<(f64, Option<String>)> {
    let text = text.trim();
    if let Ok(n) = text.parse::<f64>() {
        return Some((n, None));
    }

    let split_at = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .filter(|&i| i > 0)?;
    let (number, unit) = text.split_at(split_at);
    let number = number.trim().parse::<f64>().ok()?;
    let unit = unit.trim();
    if unit.is_empty() {
        Some((number, None))
    } else if is_known_unit(unit) {
        Some((number, Some(unit.to_string())))
    } else {
        None
    }
}
