//! Per-field parse and clamp rules for settings updates.
//!
//! Every accepted key has a dedicated cast function; values that fail the
//! cast are ignored for that key, so a bad patch never poisons the rest.

use serde_json::Value;

use super::types::{InputMode, Settings, WeatherUnit};

/// Keys accepted from settings patches. Auth fields are deliberately
/// excluded; they are only configurable through the environment.
pub const PATCH_KEYS: &[&str] = &[
    "http_port",
    "input_mode",
    "input_device",
    "rtmp_url",
    "segment_seconds",
    "min_confidence",
    "silence_threshold_db",
    "silence_min_seconds",
    "overlay_hold_seconds",
    "overlay_sticky",
    "birdnet_template",
    "birdnet_workdir",
    "location",
    "latitude",
    "longitude",
    "week",
    "auto_week",
    "weather_location",
    "weather_unit",
];

/// Keys whose change requires a capture restart.
pub const RESTART_KEYS: &[&str] = &[
    "input_mode",
    "input_device",
    "rtmp_url",
    "segment_seconds",
];

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => None,
    }
}

/// Apply one wire key to the settings, clamping to the field's valid range.
///
/// Returns `true` when the stored value changed.
pub fn apply_key(settings: &mut Settings, key: &str, value: &Value) -> bool {
    match key {
        "http_port" => {
            let Some(port) = as_i64(value) else {
                return false;
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let port = port.clamp(1, 65_535) as u16;
            replace(&mut settings.http_port, port)
        }
        "input_mode" => {
            let Some(text) = as_string(value) else {
                return false;
            };
            replace(&mut settings.input_mode, InputMode::from_wire(&text))
        }
        "input_device" => apply_string(&mut settings.input_device, value),
        "rtmp_url" => apply_string(&mut settings.stream_url, value),
        "segment_seconds" => apply_clamped(&mut settings.segment_seconds, value, 0.1, f64::MAX),
        "min_confidence" => apply_clamped(&mut settings.min_confidence, value, 0.0, 1.0),
        "silence_threshold_db" => {
            apply_clamped(&mut settings.silence_threshold_db, value, -120.0, 0.0)
        }
        "silence_min_seconds" => {
            apply_clamped(&mut settings.silence_min_seconds, value, 0.0, f64::MAX)
        }
        "overlay_hold_seconds" => {
            apply_clamped(&mut settings.overlay_hold_seconds, value, 1.0, f64::MAX)
        }
        "overlay_sticky" => apply_bool(&mut settings.overlay_sticky, value),
        "birdnet_template" => apply_string(&mut settings.classifier_template, value),
        "birdnet_workdir" => apply_string(&mut settings.classifier_workdir, value),
        "location" => apply_string(&mut settings.location, value),
        "latitude" => apply_f64(&mut settings.latitude, value),
        "longitude" => apply_f64(&mut settings.longitude, value),
        "week" => {
            let Some(week) = as_i64(value) else {
                return false;
            };
            replace(&mut settings.week, week)
        }
        "auto_week" => apply_bool(&mut settings.auto_week, value),
        "weather_location" => apply_string(&mut settings.weather_location, value),
        "weather_unit" => {
            let Some(text) = as_string(value) else {
                return false;
            };
            replace(&mut settings.weather_unit, WeatherUnit::from_wire(&text))
        }
        "settings_auth_enabled" => apply_bool(&mut settings.auth_enabled, value),
        "settings_auth_user" => {
            let Some(text) = as_string(value) else {
                return false;
            };
            let user = text.trim().to_string();
            let user = if user.is_empty() {
                "admin".to_string()
            } else {
                user
            };
            replace(&mut settings.auth_user, user)
        }
        "settings_auth_password_hash" => {
            let Some(text) = as_string(value) else {
                return false;
            };
            replace(&mut settings.auth_password_hash, text.trim().to_string())
        }
        _ => false,
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn apply_string(slot: &mut String, value: &Value) -> bool {
    as_string(value).is_some_and(|text| replace(slot, text))
}

fn apply_f64(slot: &mut f64, value: &Value) -> bool {
    as_f64(value).is_some_and(|numeric| replace(slot, numeric))
}

fn apply_clamped(slot: &mut f64, value: &Value, min: f64, max: f64) -> bool {
    as_f64(value).is_some_and(|numeric| replace(slot, numeric.clamp(min, max)))
}

fn apply_bool(slot: &mut bool, value: &Value) -> bool {
    as_bool(value).is_some_and(|flag| replace(slot, flag))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_clamps_port() {
        let mut settings = Settings::default();
        assert!(apply_key(&mut settings, "http_port", &json!(70_000)));
        assert_eq!(settings.http_port, 65_535);
        assert!(apply_key(&mut settings, "http_port", &json!(0)));
        assert_eq!(settings.http_port, 1);
    }

    #[test]
    fn test_apply_clamps_thresholds() {
        let mut settings = Settings::default();
        assert!(apply_key(&mut settings, "min_confidence", &json!(1.5)));
        assert_eq!(settings.min_confidence, 1.0);
        assert!(apply_key(&mut settings, "silence_threshold_db", &json!(-500.0)));
        assert_eq!(settings.silence_threshold_db, -120.0);
        assert!(apply_key(&mut settings, "segment_seconds", &json!(0)));
        assert_eq!(settings.segment_seconds, 0.1);
        assert!(apply_key(&mut settings, "overlay_hold_seconds", &json!(0.5)));
        assert_eq!(settings.overlay_hold_seconds, 1.0);
    }

    #[test]
    fn test_apply_accepts_numeric_strings() {
        let mut settings = Settings::default();
        assert!(apply_key(&mut settings, "latitude", &json!("42.5")));
        assert_eq!(settings.latitude, 42.5);
        assert!(apply_key(&mut settings, "week", &json!("12")));
        assert_eq!(settings.week, 12);
    }

    #[test]
    fn test_apply_bool_string_forms() {
        let mut settings = Settings::default();
        assert!(apply_key(&mut settings, "overlay_sticky", &json!("yes")));
        assert!(settings.overlay_sticky);
        assert!(apply_key(&mut settings, "overlay_sticky", &json!("off")));
        assert!(!settings.overlay_sticky);
    }

    #[test]
    fn test_apply_normalizes_input_mode() {
        let mut settings = Settings::default();
        assert!(apply_key(&mut settings, "input_mode", &json!("device")));
        assert_eq!(settings.input_mode, InputMode::Device);
        // Unknown values normalize to stream mode.
        assert!(apply_key(&mut settings, "input_mode", &json!("bogus")));
        assert_eq!(settings.input_mode, InputMode::Stream);
    }

    #[test]
    fn test_apply_ignores_bad_values() {
        let mut settings = Settings::default();
        assert!(!apply_key(&mut settings, "http_port", &json!("eighty")));
        assert!(!apply_key(&mut settings, "latitude", &json!([1, 2])));
        assert!(!apply_key(&mut settings, "no_such_key", &json!(1)));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_apply_reports_no_change_for_same_value() {
        let mut settings = Settings::default();
        assert!(!apply_key(&mut settings, "location", &json!("Stream")));
        assert!(apply_key(&mut settings, "location", &json!("Back porch")));
    }

    #[test]
    fn test_auth_user_falls_back_to_admin() {
        let mut settings = Settings::default();
        assert!(!apply_key(&mut settings, "settings_auth_user", &json!("  ")));
        assert_eq!(settings.auth_user, "admin");
    }
}
