//! Text normalization shared across the store and the HTTP surface.

/// Collapse non-alphanumerics to dashes and lowercase the result.
///
/// Used for clip and icon filenames derived from species names.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Lowercased, trimmed species lookup key.
#[must_use]
pub fn normalize_species_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalize a confidence value to a fraction in [0, 1].
///
/// Values above 1 are interpreted as percentages. Returns `None` for
/// missing or unparseable input.
#[must_use]
pub fn normalize_confidence(value: Option<&serde_json::Value>) -> Option<f64> {
    let raw = value?;
    let mut numeric = match raw {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().replace('%', "").parse::<f64>().ok()?,
        _ => return None,
    };
    if !numeric.is_finite() {
        return None;
    }
    if numeric > 1.0 {
        numeric /= 100.0;
    }
    Some(numeric.clamp(0.0, 1.0))
}

/// Normalize a plain float confidence the same way.
#[must_use]
pub fn normalize_confidence_f64(value: Option<f64>) -> Option<f64> {
    value.and_then(|v| normalize_confidence(Some(&serde_json::json!(v))))
}

/// Format a confidence as a whole percentage, e.g. `0.91` → `"91%"`.
///
/// Returns an empty string for missing values.
#[must_use]
pub fn format_confidence(value: Option<f64>) -> String {
    match normalize_confidence_f64(value) {
        Some(fraction) => format!("{:.0}%", fraction * 100.0),
        None => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slugify_collapses_punctuation() {
        assert_eq!(slugify("American Robin"), "american-robin");
        assert_eq!(slugify("  Wilson's Warbler  "), "wilson-s-warbler");
        assert_eq!(slugify("---"), "unknown");
        assert_eq!(slugify(""), "unknown");
    }

    #[test]
    fn test_normalize_species_key() {
        assert_eq!(normalize_species_key("  American Robin "), "american robin");
    }

    #[test]
    fn test_normalize_confidence_fraction_passthrough() {
        assert_eq!(normalize_confidence(Some(&json!(0.42))), Some(0.42));
    }

    #[test]
    fn test_normalize_confidence_percent_inputs() {
        assert_eq!(normalize_confidence(Some(&json!(91))), Some(0.91));
        assert_eq!(normalize_confidence(Some(&json!("85%"))), Some(0.85));
        assert_eq!(normalize_confidence(Some(&json!(250.0))), Some(1.0));
    }

    #[test]
    fn test_normalize_confidence_clamps_negative() {
        assert_eq!(normalize_confidence(Some(&json!(-0.5))), Some(0.0));
    }

    #[test]
    fn test_normalize_confidence_rejects_garbage() {
        assert_eq!(normalize_confidence(None), None);
        assert_eq!(normalize_confidence(Some(&json!("high"))), None);
        assert_eq!(normalize_confidence(Some(&json!(null))), None);
    }

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(Some(0.91)), "91%");
        assert_eq!(format_confidence(Some(25.0)), "25%");
        assert_eq!(format_confidence(None), "");
    }
}
