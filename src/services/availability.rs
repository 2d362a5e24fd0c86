use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::errors::BookingError;
use crate::models::{
    appointment_end, AppointmentQuery, Feasibility, Operatory, Provider, ScheduleBlock, SlotCandidate, SlotQuery,
    TimeOfDay, MAX_APPOINTMENT_MINUTES,
};
use crate::services::backend::BookingOperations;

/// Longest range one availability search may cover.
const MAX_RANGE_DAYS: i64 = 31;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("no provider {0} at this practice")]
    ProviderNotFound(String),

    #[error("no operatory {0} at this practice")]
    OperatoryNotFound(String),

    #[error("invalid search: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Backend(#[from] BookingError),
}

/// Arguments of the `find_slots` operation as the resolver delivers them.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotSearchArgs {
    pub date_from: NaiveDate,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub operatory_id: Option<String>,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDay>,
    pub duration_minutes: i64,
}

impl SlotSearchArgs {
    /// A single-day search unless `date_to` widens it. Times before `now`
    /// are never offered.
    pub fn into_query(self, now: NaiveDateTime) -> SlotQuery {
        let last_day = self.date_to.unwrap_or(self.date_from).max(self.date_from);
        SlotQuery {
            range_start: self.date_from.and_time(chrono::NaiveTime::default()),
            range_end: last_day
                .and_time(chrono::NaiveTime::default())
                .checked_add_signed(Duration::days(1))
                .unwrap_or(NaiveDateTime::MAX),
            provider_id: self.provider_id,
            operatory_id: self.operatory_id,
            duration_minutes: self.duration_minutes,
            time_of_day: self.time_of_day,
            not_before: Some(now),
        }
    }
}

/// Arguments of the `check_slot` operation.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotCheckArgs {
    pub start_time: NaiveDateTime,
    pub provider_id: String,
    pub operatory_id: String,
    pub duration_minutes: i64,
}

type Interval = (NaiveDateTime, NaiveDateTime);

/// Removes every busy interval from `window`, returning what is left in
/// chronological order. Intervals are half-open.
fn subtract(window: Interval, busy: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = busy
        .iter()
        .copied()
        .filter(|(s, e)| *s < window.1 && *e > window.0)
        .collect();
    sorted.sort();

    let mut free = Vec::new();
    let mut cursor = window.0;
    for (start, end) in sorted {
        if start > cursor {
            free.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < window.1 {
        free.push((cursor, window.1));
    }
    free
}

fn overlaps(busy: &[Interval], start: NaiveDateTime, end: NaiveDateTime) -> bool {
    busy.iter().any(|(s, e)| *s < end && *e > start)
}

async fn active_providers(
    backend: &dyn BookingOperations,
    org: &str,
    wanted: Option<&str>,
) -> Result<Vec<Provider>, PlannerError> {
    let mut providers: Vec<Provider> = backend
        .list_providers(org)
        .await?
        .into_iter()
        .filter(|p| p.active)
        .collect();
    providers.sort_by(|a, b| a.id.cmp(&b.id));

    match wanted {
        Some(id) => {
            let found: Vec<Provider> = providers.into_iter().filter(|p| p.id == id).collect();
            if found.is_empty() {
                return Err(PlannerError::ProviderNotFound(id.to_string()));
            }
            Ok(found)
        }
        None => Ok(providers),
    }
}

async fn active_operatories(
    backend: &dyn BookingOperations,
    org: &str,
    wanted: Option<&str>,
) -> Result<Vec<Operatory>, PlannerError> {
    let mut operatories: Vec<Operatory> = backend
        .list_operatories(org)
        .await?
        .into_iter()
        .filter(|o| o.active)
        .collect();
    operatories.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(id) = wanted {
        if !operatories.iter().any(|o| o.id == id) {
            return Err(PlannerError::OperatoryNotFound(id.to_string()));
        }
    }
    Ok(operatories)
}

fn invalid_duration() -> PlannerError {
    PlannerError::InvalidQuery(format!(
        "duration must be between 1 and {MAX_APPOINTMENT_MINUTES} minutes"
    ))
}

/// Free, non-overlapping candidates for the query, ordered by start time
/// then provider id. An empty result means fully booked.
pub async fn find_slots(
    backend: &dyn BookingOperations,
    org: &str,
    query: &SlotQuery,
) -> Result<Vec<SlotCandidate>, PlannerError> {
    if !(1..=MAX_APPOINTMENT_MINUTES).contains(&query.duration_minutes) {
        return Err(invalid_duration());
    }
    if query.range_end <= query.range_start {
        return Err(PlannerError::InvalidQuery("the range ends before it starts".to_string()));
    }
    if query.range_end - query.range_start > Duration::days(MAX_RANGE_DAYS) {
        return Err(PlannerError::InvalidQuery(format!(
            "searches are limited to {MAX_RANGE_DAYS} days"
        )));
    }

    let providers = active_providers(backend, org, query.provider_id.as_deref()).await?;
    let operatories = active_operatories(backend, org, query.operatory_id.as_deref()).await?;
    if providers.is_empty() || operatories.is_empty() {
        return Ok(Vec::new());
    }

    let blocks = backend
        .list_schedules(org, query.provider_id.as_deref())
        .await?;
    let appointments = backend
        .search_appointments(
            org,
            &AppointmentQuery {
                date_from: Some(query.range_start.date()),
                date_to: Some(query.range_end.date()),
                ..Default::default()
            },
        )
        .await?;

    let duration = Duration::minutes(query.duration_minutes);
    let mut candidates = Vec::new();

    let mut date = query.range_start.date();
    while date <= query.range_end.date() {
        for provider in &providers {
            let provider_busy: Vec<Interval> = appointments
                .iter()
                .filter(|a| a.is_active() && a.provider_id == provider.id)
                .map(|a| (a.start_time, a.end_time()))
                .collect();

            for block in blocks.iter().filter(|b| b.provider_id == provider.id) {
                let Some((open, close)) = block.window_on(date) else {
                    continue;
                };
                let window = (open.max(query.range_start), close.min(query.range_end));
                if window.0 >= window.1 {
                    continue;
                }

                for (free_start, free_end) in subtract(window, &provider_busy) {
                    let mut start = free_start;
                    while start + duration <= free_end {
                        let end = start + duration;
                        if passes_filters(query, start) {
                            if let Some(operatory_id) =
                                pick_operatory(query, block, &operatories, &appointments, start, end)
                            {
                                candidates.push(SlotCandidate {
                                    start,
                                    duration_minutes: query.duration_minutes,
                                    provider_id: provider.id.clone(),
                                    provider_name: provider.name.clone(),
                                    operatory_id,
                                    feasibility: Feasibility::Free,
                                });
                            }
                        }
                        start = end;
                    }
                }
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    candidates.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.provider_id.cmp(&b.provider_id)));
    candidates.dedup_by(|a, b| a.start == b.start && a.provider_id == b.provider_id);
    Ok(candidates)
}

fn passes_filters(query: &SlotQuery, start: NaiveDateTime) -> bool {
    if let Some(not_before) = query.not_before {
        if start < not_before {
            return false;
        }
    }
    match query.time_of_day {
        Some(tod) => tod.contains(start.time()),
        None => true,
    }
}

/// Requested room, else the block's pinned room, else the first free one.
fn pick_operatory(
    query: &SlotQuery,
    block: &ScheduleBlock,
    operatories: &[Operatory],
    appointments: &[crate::models::Appointment],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<String> {
    let room_free = |id: &str| {
        let busy: Vec<Interval> = appointments
            .iter()
            .filter(|a| a.is_active() && a.operatory_id == id)
            .map(|a| (a.start_time, a.end_time()))
            .collect();
        !overlaps(&busy, start, end)
    };

    let fixed = query.operatory_id.as_deref().or(block.operatory_id.as_deref());
    match fixed {
        Some(id) => (operatories.iter().any(|o| o.id == id) && room_free(id)).then(|| id.to_string()),
        None => operatories
            .iter()
            .find(|o| room_free(&o.id))
            .map(|o| o.id.clone()),
    }
}

/// Judges one specific provider/operatory/time without searching.
pub async fn evaluate_slot(
    backend: &dyn BookingOperations,
    org: &str,
    args: &SlotCheckArgs,
) -> Result<SlotCandidate, PlannerError> {
    let end = appointment_end(args.start_time, args.duration_minutes).ok_or_else(invalid_duration)?;
    let provider = active_providers(backend, org, Some(args.provider_id.as_str()))
        .await?
        .remove(0);
    active_operatories(backend, org, Some(args.operatory_id.as_str())).await?;

    let blocks = backend.list_schedules(org, Some(provider.id.as_str())).await?;

    let feasibility = if !blocks.iter().any(|b| b.covers(args.start_time, end)) {
        Feasibility::OutsideSchedule
    } else if has_conflict(
        backend,
        org,
        &provider.id,
        &args.operatory_id,
        args.start_time,
        args.duration_minutes,
    )
    .await?
    {
        Feasibility::Conflict
    } else {
        Feasibility::Free
    };

    Ok(SlotCandidate {
        start: args.start_time,
        duration_minutes: args.duration_minutes,
        provider_id: provider.id,
        provider_name: provider.name,
        operatory_id: args.operatory_id.clone(),
        feasibility,
    })
}

pub async fn has_conflict(
    backend: &dyn BookingOperations,
    org: &str,
    provider_id: &str,
    operatory_id: &str,
    start: NaiveDateTime,
    duration_minutes: i64,
) -> Result<bool, BookingError> {
    backend
        .has_conflict(org, provider_id, operatory_id, start, duration_minutes, None)
        .await
}
