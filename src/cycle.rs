use chrono::{Duration, NaiveDate};
use serde::Serialize;

pub const DEFAULT_CYCLE_LENGTH: i32 = 28;
pub const DEFAULT_PERIOD_LENGTH: i32 = 5;
pub const CYCLE_LENGTH_RANGE: std::ops::RangeInclusive<i32> = 21..=45;
pub const PERIOD_LENGTH_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

/// Luteal phase length is roughly constant, so ovulation is counted back from the end.
const LUTEAL_DAYS: i32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Menstrual,
    Follicular,
    Ovulatory,
    Luteal,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Menstrual => "menstrual",
            CyclePhase::Follicular => "follicular",
            CyclePhase::Ovulatory => "ovulatory",
            CyclePhase::Luteal => "luteal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSnapshot {
    pub start_date: NaiveDate,
    pub cycle_length: i32,
    pub period_length: i32,
    pub cycle_day: i32,
    pub phase: CyclePhase,
    pub in_fertile_window: bool,
    pub fertile_window_start_day: i32,
    pub fertile_window_end_day: i32,
    pub days_until_next_period: i32,
    pub next_period_date: NaiveDate,
}

impl CycleSnapshot {
    /// Where `today` falls in a cycle that began on `start_date`. Past the typical
    /// length the cycle is projected forward. `None` if the start is in the future.
    pub fn compute(
        start_date: NaiveDate,
        cycle_length: i32,
        period_length: i32,
        today: NaiveDate,
    ) -> Option<Self> {
        let elapsed = (today - start_date).num_days();
        if elapsed < 0 || cycle_length <= 0 {
            return None;
        }

        let cycle_day = (elapsed % i64::from(cycle_length)) as i32 + 1;
        let ovulation_day = cycle_length - LUTEAL_DAYS;
        let fertile_window_start_day = ovulation_day - 4;
        let fertile_window_end_day = ovulation_day + 1;

        let phase = if cycle_day <= period_length {
            CyclePhase::Menstrual
        } else if (cycle_day - ovulation_day).abs() <= 1 {
            CyclePhase::Ovulatory
        } else if cycle_day < ovulation_day {
            CyclePhase::Follicular
        } else {
            CyclePhase::Luteal
        };

        let days_until_next_period = cycle_length - cycle_day + 1;

        Some(Self {
            start_date,
            cycle_length,
            period_length,
            cycle_day,
            phase,
            in_fertile_window: (fertile_window_start_day..=fertile_window_end_day)
                .contains(&cycle_day),
            fertile_window_start_day,
            fertile_window_end_day,
            days_until_next_period,
            next_period_date: today + Duration::days(i64::from(days_until_next_period)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStat {
    pub cycle_number: i32,
    pub start_date: NaiveDate,
    /// `None` for the ongoing cycle.
    pub cycle_length: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleHistoryStats {
    pub average_cycle_length: f64,
    pub completed_cycles: usize,
    pub cycle_stats: Vec<CycleStat>,
}

/// Cycle lengths derived from the gaps between successive start dates.
pub fn cycle_history_stats(starts: &[NaiveDate]) -> CycleHistoryStats {
    let mut sorted = starts.to_vec();
    sorted.sort_unstable();

    let mut cycle_stats = Vec::with_capacity(sorted.len());
    let mut total = 0i64;
    let mut completed = 0usize;

    for (i, start) in sorted.iter().enumerate() {
        let cycle_length = sorted.get(i + 1).map(|next| (*next - *start).num_days());
        if let Some(len) = cycle_length {
            total += len;
            completed += 1;
        }
        cycle_stats.push(CycleStat {
            cycle_number: (i + 1) as i32,
            start_date: *start,
            cycle_length: cycle_length.map(|len| len as i32),
        });
    }

    CycleHistoryStats {
        average_cycle_length: if completed > 0 {
            total as f64 / completed as f64
        } else {
            0.0
        },
        completed_cycles: completed,
        cycle_stats,
    }
}
