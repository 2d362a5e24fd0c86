use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub active: bool,
}

/// A bookable room or chair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operatory {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub active: bool,
}

/// A recurring weekly working block for one provider, optionally pinned to
/// an operatory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleBlock {
    pub id: String,
    pub organization_id: String,
    pub provider_id: String,
    pub operatory_id: Option<String>,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl ScheduleBlock {
    /// The concrete working interval this block yields on `date`, if any.
    pub fn window_on(&self, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if date.weekday() != self.weekday || self.start_time >= self.end_time {
            return None;
        }
        Some((date.and_time(self.start_time), date.and_time(self.end_time)))
    }

    pub fn covers(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        match self.window_on(start.date()) {
            Some((open, close)) => start >= open && end <= close,
            None => false,
        }
    }
}

pub fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| anyhow::anyhow!("invalid weekday: {s}"))
}

pub fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// "Mon: 09:00-17:00, Fri: 10:00-16:00" ordered Monday first.
pub fn describe_hours(blocks: &[ScheduleBlock]) -> String {
    let mut sorted: Vec<&ScheduleBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| (b.weekday.num_days_from_monday(), b.start_time));

    sorted
        .iter()
        .map(|b| {
            format!(
                "{}: {}-{}",
                b.weekday,
                b.start_time.format("%H:%M"),
                b.end_time.format("%H:%M")
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
