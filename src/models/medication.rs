use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A medication reminder plan.
///
/// Immutable once created: the add-medication form builds the whole plan,
/// and removal replaces the list entry, never edits it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationPlan {
    pub name: String,
    pub start_date: NaiveDate,
    /// Treatment span in days, always >= 1.
    pub duration_days: u32,
    /// Daily intake times, in the order the user added them.
    pub daily_times: Vec<NaiveTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Duration must be at least 1 day, got {0}")]
    InvalidDuration(u32),
    #[error("Time of day must match 24-hour HH:MM, got '{0}'")]
    InvalidTime(String),
    #[error("Duplicate daily time '{0}'")]
    DuplicateTime(String),
    #[error("A plan needs at least one daily time")]
    NoTimes,
}

/// Strict 24-hour HH:MM. chrono's %H:%M parse is more lenient than the
/// form input ever produced, so the pattern is checked first.
fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("valid regex"))
}

impl MedicationPlan {
    /// Validate and build a plan from form-level inputs.
    pub fn new(
        name: impl Into<String>,
        start_date: NaiveDate,
        duration_days: u32,
        daily_times: &[&str],
    ) -> Result<Self, PlanError> {
        if duration_days < 1 {
            return Err(PlanError::InvalidDuration(duration_days));
        }
        if daily_times.is_empty() {
            return Err(PlanError::NoTimes);
        }

        let mut times: Vec<NaiveTime> = Vec::with_capacity(daily_times.len());
        for raw in daily_times {
            if !time_pattern().is_match(raw) {
                return Err(PlanError::InvalidTime((*raw).to_string()));
            }
            let time = NaiveTime::parse_from_str(raw, "%H:%M")
                .map_err(|_| PlanError::InvalidTime((*raw).to_string()))?;
            if times.contains(&time) {
                return Err(PlanError::DuplicateTime((*raw).to_string()));
            }
            times.push(time);
        }

        Ok(Self {
            name: name.into(),
            start_date,
            duration_days,
            daily_times: times,
        })
    }

    /// Last day of the treatment: start + duration - 1.
    pub fn finish_date(&self) -> NaiveDate {
        self.start_date + Days::new(u64::from(self.duration_days) - 1)
    }
}

/// One platform alarm registration.
///
/// Identity is the value itself: (instant, payload) is a pure function of
/// (plan, daily time, day offset), so cancellation recomputes the set and
/// needs no persisted alarm ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmItem {
    pub fires_at: NaiveDateTime,
    pub payload: String,
}
