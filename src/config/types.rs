//! Settings type definitions.

use serde::{Deserialize, Serialize};

/// Audio input source mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputMode {
    /// Network stream input (RTMP/RTSP/HTTP).
    #[default]
    #[serde(rename = "stream")]
    Stream,
    /// Local capture device input.
    #[serde(rename = "avfoundation")]
    Device,
}

impl InputMode {
    /// Normalize the loose string forms accepted on the wire.
    ///
    /// Unknown values fall back to stream mode.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "avfoundation" | "device" | "local" => Self::Device,
            _ => Self::Stream,
        }
    }
}

/// Temperature unit for the weather widget settings projection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WeatherUnit {
    /// Degrees Fahrenheit.
    #[default]
    Fahrenheit,
    /// Degrees Celsius.
    Celsius,
}

impl WeatherUnit {
    /// Normalize the loose string forms accepted on the wire.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "c" | "celsius" | "metric" => Self::Celsius,
            _ => Self::Fahrenheit,
        }
    }
}

/// Live tunable settings, persisted as `settings.json`.
///
/// Field renames keep the on-disk and wire keys of earlier releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// HTTP listener port.
    pub http_port: u16,
    /// Audio input mode.
    pub input_mode: InputMode,
    /// Capture device id for device mode.
    pub input_device: String,
    /// Stream URL for stream mode.
    #[serde(rename = "rtmp_url")]
    pub stream_url: String,
    /// Segment length handed to the capture tool, in seconds.
    pub segment_seconds: f64,
    /// User-facing confidence threshold for recorded detections.
    pub min_confidence: f64,
    /// Silence-gate activity threshold in dBFS.
    pub silence_threshold_db: f64,
    /// Minimum active audio required to pass the silence gate, in seconds.
    pub silence_min_seconds: f64,
    /// How long the overlay holds a detection on screen, in seconds.
    pub overlay_hold_seconds: f64,
    /// Whether the overlay keeps the last detection visible indefinitely.
    pub overlay_sticky: bool,
    /// Classifier command template; must contain `{input}` and `{output}`.
    #[serde(rename = "birdnet_template")]
    pub classifier_template: String,
    /// Working directory for classifier invocations.
    #[serde(rename = "birdnet_workdir")]
    pub classifier_workdir: String,
    /// Human-readable location label.
    pub location: String,
    /// Latitude passed to the classifier (-1 = unset).
    pub latitude: f64,
    /// Longitude passed to the classifier (-1 = unset).
    pub longitude: f64,
    /// Detection-calendar week passed to the classifier (-1 = unset).
    pub week: i64,
    /// Derive the week from the current date instead of `week`.
    pub auto_week: bool,
    /// Location for the weather widget.
    pub weather_location: String,
    /// Unit for the weather widget.
    pub weather_unit: WeatherUnit,
    /// Whether the settings surface requires HTTP Basic auth.
    #[serde(rename = "settings_auth_enabled")]
    pub auth_enabled: bool,
    /// Basic-auth username.
    #[serde(rename = "settings_auth_user")]
    pub auth_user: String,
    /// PBKDF2-SHA256 password hash; never exposed in snapshots.
    #[serde(rename = "settings_auth_password_hash")]
    pub auth_password_hash: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_port: 8002,
            input_mode: InputMode::Stream,
            input_device: String::new(),
            stream_url: String::new(),
            segment_seconds: 3.0,
            min_confidence: 0.25,
            silence_threshold_db: -45.0,
            silence_min_seconds: 0.2,
            overlay_hold_seconds: 60.0,
            overlay_sticky: false,
            classifier_template: concat!(
                "python3 -m birdnet_analyzer.analyze {input} -o {output} --rtype csv ",
                "--min_conf {min_conf} --lat {lat} --lon {lon} --week {week}"
            )
            .to_string(),
            classifier_workdir: String::new(),
            location: "Stream".to_string(),
            latitude: -1.0,
            longitude: -1.0,
            week: -1,
            auto_week: false,
            weather_location: "YOUR_ZIP".to_string(),
            weather_unit: WeatherUnit::Fahrenheit,
            auth_enabled: false,
            auth_user: "admin".to_string(),
            auth_password_hash: String::new(),
        }
    }
}
