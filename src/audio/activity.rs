//! Audio activity measurement for the silence gate.

use std::path::Path;

use tracing::debug;

/// Outcome of scanning a segment for audible activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activity {
    /// Enough frames crossed the threshold; the segment is worth analyzing.
    Active,
    /// The segment never accumulated enough active audio.
    Silent {
        /// Loudest chunk observed, in dBFS, when measurable.
        peak_db: Option<f64>,
    },
}

const CHUNK_SECONDS: f64 = 0.05;
const FLOOR_DB: f64 = -120.0;

/// Scan a wave file and decide whether it carries audible activity.
///
/// RMS is computed over 50 ms chunks and converted to dBFS against the
/// sample format's full scale. The file is active as soon as the chunks at
/// or above `threshold_db` add up to `min_active_seconds` of audio. A
/// disabled minimum (≤ 0) and unreadable files are treated as active so
/// the classifier gets the benefit of the doubt.
#[must_use]
pub fn analyze_activity(path: &Path, threshold_db: f64, min_active_seconds: f64) -> Activity {
    if min_active_seconds <= 0.0 || !threshold_db.is_finite() {
        return Activity::Active;
    }
    let Ok(mut reader) = hound::WavReader::open(path) else {
        debug!("unreadable segment treated as active: {}", path.display());
        return Activity::Active;
    };

    let spec = reader.spec();
    if reader.duration() == 0 {
        return Activity::Silent { peak_db: None };
    }
    let sample_rate = f64::from(spec.sample_rate);
    let channels = usize::from(spec.channels.max(1));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let chunk_samples = ((sample_rate * CHUNK_SECONDS) as usize).max(1) * channels;

    let max_amp = match spec.sample_format {
        hound::SampleFormat::Float => 1.0,
        hound::SampleFormat::Int => f64::from(1u32 << (spec.bits_per_sample - 1)),
    };

    let mut chunk: Vec<f64> = Vec::with_capacity(chunk_samples);
    let mut active_frames = 0.0_f64;
    let mut max_db = FLOOR_DB;

    let mut scan_chunk = |chunk: &mut Vec<f64>| -> Option<Activity> {
        if chunk.is_empty() {
            return None;
        }
        let mean_square: f64 =
            chunk.iter().map(|s| s * s).sum::<f64>() / chunk.len() as f64;
        let rms = mean_square.sqrt();
        let db = if rms <= 0.0 {
            FLOOR_DB
        } else {
            20.0 * (rms / max_amp).log10()
        };
        if db > max_db {
            max_db = db;
        }
        if db >= threshold_db {
            active_frames += (chunk.len() / channels) as f64;
            if active_frames / sample_rate >= min_active_seconds {
                return Some(Activity::Active);
            }
        }
        chunk.clear();
        None
    };

    macro_rules! scan_samples {
        ($iter:expr) => {
            for sample in $iter {
                let Ok(sample) = sample else {
                    return Activity::Active;
                };
                chunk.push(sample);
                if chunk.len() >= chunk_samples {
                    if let Some(result) = scan_chunk(&mut chunk) {
                        return result;
                    }
                }
            }
        };
    }

    match spec.sample_format {
        hound::SampleFormat::Float => {
            scan_samples!(reader.samples::<f32>().map(|s| s.map(f64::from)));
        }
        hound::SampleFormat::Int => {
            scan_samples!(reader.samples::<i32>().map(|s| s.map(f64::from)));
        }
    }
    if let Some(result) = scan_chunk(&mut chunk) {
        return result;
    }

    Activity::Silent {
        peak_db: Some(max_db),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audio::testwav::{tone_then_silence, write_mono_i16};

    #[test]
    fn test_constant_zeros_are_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.wav");
        write_mono_i16(&path, 48_000, &vec![0i16; 48_000 * 3]);

        let result = analyze_activity(&path, -45.0, 0.2);
        let Activity::Silent { peak_db } = result else {
            panic!("expected silent, got {result:?}");
        };
        assert!(peak_db.unwrap() <= -100.0);
    }

    #[test]
    fn test_tone_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = tone_then_silence(48_000, 1.0, 1.0, 0.5);
        write_mono_i16(&path, 48_000, &samples);

        assert_eq!(analyze_activity(&path, -45.0, 0.2), Activity::Active);
    }

    #[test]
    fn test_short_blip_below_minimum_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blip.wav");
        // 50 ms of tone cannot satisfy a 0.5 s activity minimum.
        let samples = tone_then_silence(48_000, 0.05, 2.0, 0.5);
        write_mono_i16(&path, 48_000, &samples);

        let result = analyze_activity(&path, -45.0, 0.5);
        assert!(matches!(result, Activity::Silent { peak_db: Some(db) } if db > -45.0));
    }

    #[test]
    fn test_disabled_minimum_passes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.wav");
        write_mono_i16(&path, 48_000, &vec![0i16; 4_800]);
        assert_eq!(analyze_activity(&path, -45.0, 0.0), Activity::Active);
    }

    #[test]
    fn test_unreadable_file_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a wav").unwrap();
        assert_eq!(analyze_activity(&path, -45.0, 0.2), Activity::Active);
    }
}
