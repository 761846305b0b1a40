//! Relationship health score and check-in streaks.
//!
//! Everything here is a pure function of rows already loaded by a handler.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::models::{DailyCheckin, JournalEntry};

pub const LOOKBACK_DAYS: i64 = 30;
const RECENT_DAYS: i64 = 7;
const NEUTRAL_SCORE: f64 = 5.0;

const CONNECTION_WEIGHT: f64 = 0.5;
const MOOD_WEIGHT: f64 = 0.3;
const CONSISTENCY_POINTS: f64 = 20.0;
const TREND_MULTIPLIER: f64 = 2.5;
const TREND_CAP: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub score: i32,
    pub data_points: usize,
    pub average_connection: Option<f64>,
    pub average_mood: Option<f64>,
    pub checkin_days: usize,
    pub connection_component: f64,
    pub mood_component: f64,
    pub consistency_component: f64,
    pub trend_adjustment: f64,
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Health score in `[0, 100]` over the last [`LOOKBACK_DAYS`].
///
/// Connection carries 50 points, mood 30, check-in consistency 20, and the
/// week-over-month connection trend nudges the total by at most 5 either way.
/// With nothing to go on the score sits at a neutral 50.
pub fn health_score(
    checkins: &[DailyCheckin],
    journals: &[JournalEntry],
    now: DateTime<Utc>,
) -> HealthScore {
    let today = now.date_naive();
    let window_start = today - Duration::days(LOOKBACK_DAYS - 1);
    let recent_start = today - Duration::days(RECENT_DAYS - 1);
    let journal_cutoff = now - Duration::days(LOOKBACK_DAYS);

    let in_window: Vec<&DailyCheckin> = checkins
        .iter()
        .filter(|c| c.checkin_date >= window_start && c.checkin_date <= today)
        .collect();

    let journal_moods: Vec<f64> = journals
        .iter()
        .filter(|j| j.created_at >= journal_cutoff)
        .filter_map(|j| j.mood_score.map(f64::from))
        .collect();

    let data_points = in_window.len() + journal_moods.len();
    if data_points == 0 {
        return HealthScore {
            score: 50,
            data_points: 0,
            average_connection: None,
            average_mood: None,
            checkin_days: 0,
            connection_component: 0.0,
            mood_component: 0.0,
            consistency_component: 0.0,
            trend_adjustment: 0.0,
        };
    }

    let average_connection = average(in_window.iter().map(|c| f64::from(c.connection_score)));
    let average_mood = average(
        in_window
            .iter()
            .map(|c| f64::from(c.mood_score))
            .chain(journal_moods.iter().copied()),
    );

    let connection_component =
        (average_connection.unwrap_or(NEUTRAL_SCORE) * 10.0 * CONNECTION_WEIGHT).min(50.0);
    let mood_component = (average_mood.unwrap_or(NEUTRAL_SCORE) * 10.0 * MOOD_WEIGHT).min(30.0);

    let checkin_days = in_window
        .iter()
        .map(|c| c.checkin_date)
        .collect::<BTreeSet<_>>()
        .len();
    let consistency_component =
        (checkin_days as f64 / LOOKBACK_DAYS as f64 * CONSISTENCY_POINTS).min(CONSISTENCY_POINTS);

    let recent = average(
        in_window
            .iter()
            .filter(|c| c.checkin_date >= recent_start)
            .map(|c| f64::from(c.connection_score)),
    );
    let earlier = average(
        in_window
            .iter()
            .filter(|c| c.checkin_date < recent_start)
            .map(|c| f64::from(c.connection_score)),
    );
    let trend_adjustment = match (recent, earlier) {
        (Some(r), Some(e)) => ((r - e) * TREND_MULTIPLIER).clamp(-TREND_CAP, TREND_CAP),
        _ => 0.0,
    };

    let total = connection_component + mood_component + consistency_component + trend_adjustment;

    HealthScore {
        score: (total.round() as i32).clamp(0, 100),
        data_points,
        average_connection,
        average_mood,
        checkin_days,
        connection_component,
        mood_component,
        consistency_component,
        trend_adjustment,
    }
}

/// Consecutive days with a check-in, ending today or yesterday.
pub fn checkin_streak(dates: &[NaiveDate], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = dates.iter().copied().collect();

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}
