//! Signal-to-noise estimation for the best-clip selector.

use std::path::Path;

const WINDOW_SECONDS: f64 = 0.2;
const NOISE_FRACTION: f64 = 0.1;

/// Estimate the SNR of a wave file in dB.
///
/// RMS is computed over 200 ms windows (channels mixed to mono). The noise
/// floor is the mean of the quietest 10 % of windows and the signal level
/// is the mean of all windows; the estimate is
/// `20·log10(signal / noise_floor)`, rounded to two decimals. Returns
/// `None` when the file is unreadable or either level is non-positive.
#[must_use]
pub fn compute_snr_db(path: &Path) -> Option<f64> {
    let mut reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    let channels = usize::from(spec.channels.max(1));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let window_frames = ((f64::from(spec.sample_rate) * WINDOW_SECONDS) as usize).max(1);

    let mut rms_values: Vec<f64> = Vec::new();
    let mut frame = Vec::with_capacity(channels);
    let mut window_acc = 0.0_f64;
    let mut window_count = 0usize;

    let mut push_mono = |value: f64, frame: &mut Vec<f64>| -> Option<()> {
        frame.push(value);
        if frame.len() == channels {
            let mono = frame.iter().sum::<f64>() / channels as f64;
            frame.clear();
            window_acc += mono * mono;
            window_count += 1;
            if window_count >= window_frames {
                rms_values.push((window_acc / window_count as f64).sqrt());
                window_acc = 0.0;
                window_count = 0;
            }
        }
        Some(())
    };

    match spec.sample_format {
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                push_mono(f64::from(sample.ok()?), &mut frame)?;
            }
        }
        hound::SampleFormat::Int => {
            for sample in reader.samples::<i32>() {
                push_mono(f64::from(sample.ok()?), &mut frame)?;
            }
        }
    }
    if window_count > 0 {
        rms_values.push((window_acc / window_count as f64).sqrt());
    }
    if rms_values.is_empty() {
        return None;
    }

    rms_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let noise_count = ((rms_values.len() as f64 * NOISE_FRACTION) as usize).max(1);
    let noise_floor = rms_values[..noise_count].iter().sum::<f64>() / noise_count as f64;
    let signal = rms_values.iter().sum::<f64>() / rms_values.len() as f64;
    if noise_floor <= 0.0 || signal <= 0.0 {
        return None;
    }
    let snr = 20.0 * (signal / noise_floor).log10();
    Some((snr * 100.0).round() / 100.0)
}
