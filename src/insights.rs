//! Heuristic insight candidates, ranking, and partner-facing suggestions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle::CyclePhase;
use crate::models::{DailyCheckin, JournalEntry};

pub const CHECKIN_LOOKBACK_HOURS: i64 = 72;
pub const JOURNAL_LOOKBACK_HOURS: i64 = 48;
pub const INSIGHT_TTL_DAYS: i64 = 7;
pub const SUGGESTION_TTL_DAYS: i64 = 3;

pub const FREE_INSIGHT_CAP: usize = 3;
pub const PREMIUM_INSIGHT_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    LowConnection,
    ConnectionDrop,
    SelfCare,
    CycleAwareness,
    Celebrate,
    CheckinReminder,
    JournalPrompt,
}

impl InsightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::LowConnection => "low_connection",
            InsightKind::ConnectionDrop => "connection_drop",
            InsightKind::SelfCare => "self_care",
            InsightKind::CycleAwareness => "cycle_awareness",
            InsightKind::Celebrate => "celebrate",
            InsightKind::CheckinReminder => "checkin_reminder",
            InsightKind::JournalPrompt => "journal_prompt",
        }
    }

    pub fn priority(self) -> i32 {
        match self {
            InsightKind::LowConnection => 90,
            InsightKind::ConnectionDrop => 80,
            InsightKind::SelfCare => 70,
            InsightKind::CycleAwareness => 60,
            InsightKind::Celebrate => 50,
            InsightKind::CheckinReminder => 40,
            InsightKind::JournalPrompt => 30,
        }
    }

    /// Kinds whose gist may be passed on, anonymized, to the other members.
    pub fn is_shareable(self) -> bool {
        matches!(
            self,
            InsightKind::LowConnection
                | InsightKind::ConnectionDrop
                | InsightKind::SelfCare
                | InsightKind::CycleAwareness
        )
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown insight kind: {0}")]
pub struct UnknownKind(String);

impl FromStr for InsightKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low_connection" => InsightKind::LowConnection,
            "connection_drop" => InsightKind::ConnectionDrop,
            "self_care" => InsightKind::SelfCare,
            "cycle_awareness" => InsightKind::CycleAwareness,
            "celebrate" => InsightKind::Celebrate,
            "checkin_reminder" => InsightKind::CheckinReminder,
            "journal_prompt" => InsightKind::JournalPrompt,
            other => return Err(UnknownKind(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightSource {
    Daily,
    OnDemand,
}

impl InsightSource {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightSource::Daily => "daily",
            InsightSource::OnDemand => "on_demand",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightCandidate {
    pub kind: InsightKind,
    pub title: String,
    pub body: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionDraft {
    pub kind: InsightKind,
    pub suggestion: String,
    pub relevance_score: i32,
}

/// Recent rows for one member of one relationship.
#[derive(Debug, Clone, Copy)]
pub struct InsightInputs<'a> {
    pub checkins: &'a [DailyCheckin],
    pub journals: &'a [JournalEntry],
    pub cycle_phase: Option<CyclePhase>,
    pub now: DateTime<Utc>,
}

struct Signals {
    checkin_count: usize,
    checkins_48h: usize,
    avg_connection: Option<f64>,
    avg_mood: Option<f64>,
    latest_drop: Option<i32>,
    journal_count: usize,
    avg_journal_mood: Option<f64>,
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

impl Signals {
    fn gather(inputs: &InsightInputs<'_>) -> Self {
        let checkin_cutoff = inputs.now - Duration::hours(CHECKIN_LOOKBACK_HOURS);
        let journal_cutoff = inputs.now - Duration::hours(JOURNAL_LOOKBACK_HOURS);

        let mut recent: Vec<&DailyCheckin> = inputs
            .checkins
            .iter()
            .filter(|c| c.updated_at >= checkin_cutoff)
            .collect();
        recent.sort_by_key(|c| (c.checkin_date, c.updated_at));

        let latest_drop = match recent.as_slice() {
            [.., previous, latest] => Some(previous.connection_score - latest.connection_score),
            _ => None,
        };

        let journals: Vec<&JournalEntry> = inputs
            .journals
            .iter()
            .filter(|j| j.created_at >= journal_cutoff)
            .collect();

        Self {
            checkin_count: recent.len(),
            checkins_48h: recent
                .iter()
                .filter(|c| c.updated_at >= journal_cutoff)
                .count(),
            avg_connection: average(recent.iter().map(|c| f64::from(c.connection_score))),
            avg_mood: average(recent.iter().map(|c| f64::from(c.mood_score))),
            latest_drop,
            journal_count: journals.len(),
            avg_journal_mood: average(journals.iter().filter_map(|j| j.mood_score.map(f64::from))),
        }
    }
}

fn candidate(kind: InsightKind, title: &str, body: String) -> InsightCandidate {
    InsightCandidate {
        kind,
        title: title.to_string(),
        body,
        priority: kind.priority().clamp(0, 100),
    }
}

/// Every insight the recent rows trigger, highest priority first.
pub fn generate_candidates(inputs: &InsightInputs<'_>) -> Vec<InsightCandidate> {
    let signals = Signals::gather(inputs);
    let mut out = Vec::new();

    if let Some(avg) = signals.avg_connection.filter(|avg| *avg <= 4.0) {
        out.push(candidate(
            InsightKind::LowConnection,
            "Connection has been low",
            format!(
                "Your connection scores over the last few days average {avg:.1}/10. \
                 Try setting aside 20 distraction-free minutes together this week."
            ),
        ));
    }

    if let Some(drop) = signals.latest_drop.filter(|d| *d >= 3) {
        out.push(candidate(
            InsightKind::ConnectionDrop,
            "A sudden dip in connection",
            format!(
                "Your latest check-in was {drop} points lower than the one before. \
                 A short, curious conversation about how the day went can help you reconnect."
            ),
        ));
    }

    if let Some(mood) = signals.avg_journal_mood.filter(|m| *m <= 3.0) {
        out.push(candidate(
            InsightKind::SelfCare,
            "Make room for yourself",
            format!(
                "Your recent journal moods average {mood:.1}/10. \
                 Looking after yourself is part of looking after the relationship."
            ),
        ));
    }

    match inputs.cycle_phase {
        Some(CyclePhase::Menstrual) => out.push(candidate(
            InsightKind::CycleAwareness,
            "Go gently this week",
            "You're in the menstrual phase. Energy often dips, so plan low-key time \
             together and let your partner know what helps."
                .to_string(),
        )),
        Some(CyclePhase::Luteal) => out.push(candidate(
            InsightKind::CycleAwareness,
            "Heads-up for the days ahead",
            "You're in the luteal phase, when patience can run shorter. \
             Naming that early makes small frictions easier to talk through."
                .to_string(),
        )),
        _ => {}
    }

    if let (Some(conn), Some(mood)) = (signals.avg_connection, signals.avg_mood) {
        if conn >= 8.0 && mood >= 8.0 {
            out.push(candidate(
                InsightKind::Celebrate,
                "Things are going well",
                "Your connection and mood have both been high. \
                 Tell your partner one specific thing you appreciated recently."
                    .to_string(),
            ));
        }
    }

    if signals.checkins_48h == 0 {
        out.push(candidate(
            InsightKind::CheckinReminder,
            "Time for a check-in",
            "You haven't checked in for a couple of days. \
             A quick rating keeps your insights accurate."
                .to_string(),
        ));
    }

    if signals.checkin_count > 0 && signals.journal_count == 0 {
        out.push(candidate(
            InsightKind::JournalPrompt,
            "Put it into words",
            "Your check-ins tell part of the story. \
             A few sentences in your journal can capture the rest."
                .to_string(),
        ));
    }

    rank(&mut out);
    out
}

fn rank(candidates: &mut [InsightCandidate]) {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
    });
}

pub fn tier_cap(premium: bool) -> usize {
    if premium {
        PREMIUM_INSIGHT_CAP
    } else {
        FREE_INSIGHT_CAP
    }
}

/// Drop kinds that are already live for this member, then cap by tier.
pub fn select(
    mut candidates: Vec<InsightCandidate>,
    live_kinds: &HashSet<InsightKind>,
    premium: bool,
) -> Vec<InsightCandidate> {
    candidates.retain(|c| !live_kinds.contains(&c.kind));
    rank(&mut candidates);
    candidates.truncate(tier_cap(premium));
    candidates
}

/// Partner-facing version of an insight. Never carries the author's own
/// wording, scores, or journal content.
pub fn partner_suggestion(insight: &InsightCandidate) -> Option<SuggestionDraft> {
    if !insight.kind.is_shareable() {
        return None;
    }

    let suggestion = match insight.kind {
        InsightKind::LowConnection => {
            "Your partner may be feeling a little distant lately. \
             Suggest a small plan for just the two of you, like a walk or a shared meal."
        }
        InsightKind::ConnectionDrop => {
            "Something may have shifted for your partner recently. \
             An open, no-pressure \"how are you, really?\" could go a long way."
        }
        InsightKind::SelfCare => {
            "Your partner could use some extra support right now. \
             Offering to take something off their plate is a kind gesture."
        }
        InsightKind::CycleAwareness => {
            "Your partner may have lower energy over the next few days. \
             Extra patience and a cozy night in could be welcome."
        }
        _ => return None,
    };

    Some(SuggestionDraft {
        kind: insight.kind,
        suggestion: suggestion.to_string(),
        relevance_score: (insight.priority - 10).clamp(0, 100),
    })
}

/// A short, content-free summary of the signals, for prompting the LLM.
pub fn signals_summary(inputs: &InsightInputs<'_>) -> String {
    let signals = Signals::gather(inputs);
    let fmt_avg = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));
    format!(
        "{} check-ins in 72h (avg connection {}, avg mood {}), {} journal entries in 48h (avg mood {}), cycle phase {}",
        signals.checkin_count,
        fmt_avg(signals.avg_connection),
        fmt_avg(signals.avg_mood),
        signals.journal_count,
        fmt_avg(signals.avg_journal_mood),
        inputs.cycle_phase.map_or("n/a", CyclePhase::as_str),
    )
}
