use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Longest appointment any workflow may book.
pub const MAX_APPOINTMENT_MINUTES: i64 = 480;

/// When an appointment of `duration_minutes` starting at `start` ends, or
/// `None` if the length is outside `1..=MAX_APPOINTMENT_MINUTES`.
pub fn appointment_end(start: NaiveDateTime, duration_minutes: i64) -> Option<NaiveDateTime> {
    if !(1..=MAX_APPOINTMENT_MINUTES).contains(&duration_minutes) {
        return None;
    }
    start.checked_add_signed(Duration::try_minutes(duration_minutes)?)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub organization_id: String,
    pub patient_id: String,
    pub provider_id: String,
    pub operatory_id: String,
    pub start_time: NaiveDateTime,
    pub duration_minutes: i64,
    pub appointment_type: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + Duration::minutes(self.duration_minutes)
    }

    /// Half-open interval overlap: touching edges do not conflict.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start_time < end && self.end_time() > start
    }

    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "completed" => AppointmentStatus::Completed,
            "cancelled" => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentQuery {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub operatory_id: Option<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub include_cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: String,
    pub provider_id: String,
    pub operatory_id: String,
    pub start_time: NaiveDateTime,
    pub duration_minutes: i64,
    #[serde(default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Reschedule arguments. The appointment keeps its patient and type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentChanges {
    pub appointment_id: String,
    pub provider_id: String,
    pub operatory_id: String,
    pub start_time: NaiveDateTime,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2030-01-08 09:00", "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_appointment_end_bounds() {
        assert_eq!(
            appointment_end(start(), 45),
            NaiveDateTime::parse_from_str("2030-01-08 09:45", "%Y-%m-%d %H:%M").ok()
        );
        assert!(appointment_end(start(), MAX_APPOINTMENT_MINUTES).is_some());
        assert_eq!(appointment_end(start(), 0), None);
        assert_eq!(appointment_end(start(), MAX_APPOINTMENT_MINUTES + 1), None);
        assert_eq!(appointment_end(start(), 1_000_000_000_000), None);
        assert_eq!(appointment_end(NaiveDateTime::MAX, 30), None);
    }
}
