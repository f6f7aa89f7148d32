//! Capture-tool resolution, command construction, and device enumeration.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{InputMode, Settings};
use crate::constants::{FALLBACK_FFMPEG_PATHS, SEGMENT_PATTERN};

/// Result of building the capture command line.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureCommand {
    /// Full argv, ffmpeg path included.
    Ready(Vec<String>),
    /// The configuration cannot produce a runnable command.
    Misconfigured(&'static str),
}

/// Locate ffmpeg on `PATH`, falling back to the known system locations.
#[must_use]
pub fn resolve_ffmpeg_path() -> Option<PathBuf> {
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join("ffmpeg");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    FALLBACK_FFMPEG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

/// Build the ffmpeg invocation for the configured input.
#[must_use]
pub fn build_capture_command(
    settings: &Settings,
    ffmpeg_path: &Path,
    tmp_dir: &Path,
) -> CaptureCommand {
    let mut input_args: Vec<String> = Vec::new();
    match settings.input_mode {
        InputMode::Device => {
            let device = settings.input_device.trim();
            if device.is_empty() {
                return CaptureCommand::Misconfigured("Audio input not set");
            }
            input_args.extend([
                "-f".to_string(),
                "avfoundation".to_string(),
                "-i".to_string(),
                format!(":{device}"),
            ]);
        }
        InputMode::Stream => {
            if settings.stream_url.is_empty() {
                return CaptureCommand::Misconfigured("Stream URL not set");
            }
            let scheme = url::Url::parse(&settings.stream_url)
                .map(|parsed| parsed.scheme().to_lowercase())
                .unwrap_or_default();
            if scheme == "rtsp" {
                input_args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
            }
            input_args.extend([
                "-i".to_string(),
                settings.stream_url.clone(),
                "-map".to_string(),
                "0:a:0".to_string(),
            ]);
        }
    }

    let mut command = vec![
        ffmpeg_path.to_string_lossy().into_owned(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-hide_banner".to_string(),
        "-y".to_string(),
    ];
    command.extend(input_args);
    command.extend([
        "-vn".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        "48000".to_string(),
        "-f".to_string(),
        "segment".to_string(),
        "-segment_time".to_string(),
        settings.segment_seconds.to_string(),
        "-reset_timestamps".to_string(),
        "1".to_string(),
        tmp_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
    ]);
    CaptureCommand::Ready(command)
}

/// One enumerable audio input device.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AudioInput {
    /// Device index as reported by the capture tool.
    pub id: String,
    /// Human-readable device name.
    pub name: String,
}

/// Parse the audio-device section of the capture tool's device listing.
///
/// The listing arrives on stderr as `[N] Name` lines between the audio and
/// video section markers.
#[must_use]
pub fn parse_device_listing(stderr: &str) -> Vec<AudioInput> {
    let mut devices = Vec::new();
    let mut in_audio = false;
    for line in stderr.lines() {
        if line.contains("AVFoundation audio devices") {
            in_audio = true;
            continue;
        }
        if line.contains("AVFoundation video devices") {
            in_audio = false;
            continue;
        }
        if !in_audio {
            continue;
        }
        let Some(open) = line.rfind('[') else { continue };
        let Some(close_offset) = line[open..].find(']') else {
            continue;
        };
        let id = &line[open + 1..open + close_offset];
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let name = line[open + close_offset + 1..].trim();
        if name.is_empty() {
            continue;
        }
        devices.push(AudioInput {
            id: id.to_string(),
            name: name.to_string(),
        });
    }
    devices
}

/// Enumerate device-mode audio inputs via the capture tool.
///
/// Returns the devices plus an optional operator-facing error.
#[must_use]
pub fn list_audio_inputs() -> (Vec<AudioInput>, Option<String>) {
    let Some(ffmpeg_path) = resolve_ffmpeg_path() else {
        return (Vec::new(), Some("ffmpeg not found".to_string()));
    };
    let output = std::process::Command::new(ffmpeg_path)
        .args(["-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .output();
    match output {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            (parse_device_listing(&stderr), None)
        }
        Err(e) => (Vec::new(), Some(e.to_string())),
    }
}
