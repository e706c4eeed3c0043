//! Recency boost (spec §4.2.4): a piecewise multiplier on raw relevance
//! scores, steepest in the first hour and flattening to 1.0 after a week.

use chrono::{DateTime, Utc};

/// Multiplier applied to a raw score given `h` hours since `updated_at`.
pub fn recency_multiplier(hours_since_update: f64) -> f64 {
    let h = hours_since_update.max(0.0);
    if h < 1.0 {
        1.5 - 0.2 * h
    } else if h < 24.0 {
        1.3 - 0.2 * (h - 1.0) / 23.0
    } else if h < 168.0 {
        1.1 - 0.1 * (h - 24.0) / 144.0
    } else {
        1.0
    }
}

pub fn apply_recency_boost(score: f64, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = (now - updated_at).num_milliseconds() as f64 / 3_600_000.0;
    score * recency_multiplier(hours)
}
