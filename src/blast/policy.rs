//! Admission policy: may the next message of a blast be sent now?

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::Serialize;

use super::budget::RateLimitBudget;
use super::model::PauseReason;
use crate::config::AntiSpamConfig;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Send now.
    Proceed,
    /// Hourly cap reached; wait for the hourly window to reset and ask again.
    WaitHour,
    /// Daily cap reached; the run stops paused.
    PauseDaily,
    /// Outside the allowed sending hours; the run stops paused.
    PauseOutsideHours,
    /// Weekend and the blast skips weekends; the run stops paused.
    PauseWeekend,
}

impl Decision {
    /// The pause reason for decisions that end the current run.
    pub fn pause_reason(&self) -> Option<PauseReason> {
        match self {
            Self::PauseDaily => Some(PauseReason::DailyLimit),
            Self::PauseOutsideHours => Some(PauseReason::OutsideHours),
            Self::PauseWeekend => Some(PauseReason::Weekend),
            Self::Proceed | Self::WaitHour => None,
        }
    }
}

/// Decide whether the next send may proceed. Checks run in priority order:
/// hourly cap, daily cap, allowed hours, weekends.
pub fn decide(now: NaiveDateTime, config: &AntiSpamConfig, budget: &RateLimitBudget) -> Decision {
    if budget.sent_this_hour >= config.max_messages_per_hour {
        return Decision::WaitHour;
    }

    if budget.sent_today >= config.max_messages_per_day {
        return Decision::PauseDaily;
    }

    let hour = now.hour();
    if hour < config.allowed_hours_start || hour >= config.allowed_hours_end {
        return Decision::PauseOutsideHours;
    }

    if config.skip_weekends && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return Decision::PauseWeekend;
    }

    Decision::Proceed
}
