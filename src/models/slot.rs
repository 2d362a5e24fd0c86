use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feasibility {
    Free,
    Conflict,
    OutsideSchedule,
}

/// One bookable (or rejected) provider/operatory/time combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotCandidate {
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub provider_id: String,
    pub provider_name: String,
    pub operatory_id: String,
    pub feasibility: Feasibility,
}

impl SlotCandidate {
    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::minutes(self.duration_minutes)
    }

    pub fn is_free(&self) -> bool {
        self.feasibility == Feasibility::Free
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotQuery {
    pub range_start: NaiveDateTime,
    pub range_end: NaiveDateTime,
    pub provider_id: Option<String>,
    pub operatory_id: Option<String>,
    pub duration_minutes: i64,
    pub time_of_day: Option<TimeOfDay>,
    /// Candidates starting before this instant are dropped.
    pub not_before: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub fn contains(&self, time: NaiveTime) -> bool {
        match self {
            TimeOfDay::Morning => time.hour() < 12,
            TimeOfDay::Afternoon => (12..17).contains(&time.hour()),
            TimeOfDay::Evening => time.hour() >= 17,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "morning" | "am" => Some(TimeOfDay::Morning),
            "afternoon" | "midday" | "lunch" => Some(TimeOfDay::Afternoon),
            "evening" | "night" | "after work" => Some(TimeOfDay::Evening),
            _ => None,
        }
    }
}
