//! Half-hour activity histogram over recent detections.

use chrono::{Duration, Local, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::constants::http::{DEFAULT_ACTIVITY_DAYS, MAX_ACTIVITY_DAYS};
use crate::store::Store;
use crate::utils::time::{current_local_bucket, parse_timestamp};

const BINS: usize = 48;

/// Build the activity curve for a requested window of days.
///
/// Detections are binned into 48 half-hour local-time buckets. `points`
/// holds the per-day average; `today_points` holds today's raw counts with
/// buckets past the current local time nulled out.
#[must_use]
pub fn build_activity_curve(store: &Store, days_raw: Option<&str>) -> Value {
    let days = days_raw
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_ACTIVITY_DAYS)
        .clamp(1, MAX_ACTIVITY_DAYS);

    let now = Utc::now();
    let cutoff = (now - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true);
    let today = Local::now().date_naive();

    let mut counts = [0u64; BINS];
    let mut today_counts = [0u64; BINS];
    for stamp in store.detection_timestamps_since(&cutoff) {
        let Some(dt) = parse_timestamp(&stamp) else {
            continue;
        };
        let local = dt.with_timezone(&Local);
        let bucket = bucket_index(&local);
        counts[bucket] += 1;
        if local.date_naive() == today {
            today_counts[bucket] += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let points: Vec<f64> = counts
        .iter()
        .map(|&count| ((count as f64 / days as f64) * 100.0).round() / 100.0)
        .collect();

    let current_bucket = current_local_bucket();
    let today_points: Vec<Value> = today_counts
        .iter()
        .enumerate()
        .map(|(index, &count)| {
            if index > current_bucket {
                Value::Null
            } else {
                json!(count)
            }
        })
        .collect();

    json!({
        "points": points,
        "today_points": today_points,
        "days": days,
    })
}

fn bucket_index(local: &chrono::DateTime<Local>) -> usize {
    use chrono::Timelike;
    let bucket = (local.hour() * 2 + local.minute() / 30) as usize;
    bucket.min(BINS - 1)
}
