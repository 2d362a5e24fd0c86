use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::models::practice::{parse_weekday, weekday_code};
use crate::models::{
    Appointment, AppointmentQuery, AppointmentStatus, Operatory, Patient, PatientQuery, Provider,
    ScheduleBlock,
};

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn dt_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, DT_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn date_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| conversion_error(idx, e))
}

/// Appends `AND <clause> ?N` with the next positional index.
fn push_filter(sql: &mut String, args: &mut Vec<Box<dyn ToSql>>, clause: &str, value: Box<dyn ToSql>) {
    args.push(value);
    sql.push_str(&format!(" AND {clause} ?{}", args.len()));
}

// ── Organizations ──

pub fn insert_organization(
    conn: &Connection,
    id: &str,
    name: &str,
    settings: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO organizations (id, name, settings) VALUES (?1, ?2, ?3)",
        params![id, name, settings],
    )?;
    Ok(())
}

pub fn get_organization_settings(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    let result = conn.query_row(
        "SELECT settings FROM organizations WHERE id = ?1",
        params![id],
        |row| row.get::<_, Option<String>>(0),
    );
    match result {
        Ok(settings) => Ok(settings),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn save_organization_settings(
    conn: &Connection,
    id: &str,
    settings: &str,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE organizations SET settings = ?1 WHERE id = ?2",
        params![settings, id],
    )?;
    Ok(count > 0)
}

// ── Patients ──

const PATIENT_COLUMNS: &str =
    "id, organization_id, first_name, last_name, phone, email, date_of_birth, created_at, updated_at";

fn parse_patient_row(row: &Row) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        date_of_birth: date_col(row, 6)?,
        created_at: dt_col(row, 7)?,
        updated_at: dt_col(row, 8)?,
    })
}

pub fn insert_patient(conn: &Connection, patient: &Patient) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO patients (id, organization_id, first_name, last_name, phone, email, date_of_birth, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            patient.id,
            patient.organization_id,
            patient.first_name,
            patient.last_name,
            patient.phone,
            patient.email,
            patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
            fmt_dt(&patient.created_at),
            fmt_dt(&patient.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_patient(conn: &Connection, patient: &Patient) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE patients SET first_name = ?1, last_name = ?2, phone = ?3, email = ?4, date_of_birth = ?5, updated_at = ?6
         WHERE id = ?7 AND organization_id = ?8",
        params![
            patient.first_name,
            patient.last_name,
            patient.phone,
            patient.email,
            patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
            fmt_dt(&patient.updated_at),
            patient.id,
            patient.organization_id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_patient(conn: &Connection, org: &str, id: &str) -> rusqlite::Result<Option<Patient>> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE organization_id = ?1 AND id = ?2");
    match conn.query_row(&sql, params![org, id], parse_patient_row) {
        Ok(p) => Ok(Some(p)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Name comparisons are case-insensitive; `phone` must already be normalized.
pub fn find_patients(
    conn: &Connection,
    org: &str,
    query: &PatientQuery,
) -> rusqlite::Result<Vec<Patient>> {
    let mut sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE organization_id = ?1");
    let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(org.to_string())];

    if let Some(phone) = &query.phone {
        push_filter(&mut sql, &mut args, "phone =", Box::new(phone.clone()));
    }
    if let Some(first) = &query.first_name {
        push_filter(&mut sql, &mut args, "lower(first_name) =", Box::new(first.trim().to_lowercase()));
    }
    if let Some(last) = &query.last_name {
        push_filter(&mut sql, &mut args, "lower(last_name) =", Box::new(last.trim().to_lowercase()));
    }
    if let Some(dob) = &query.date_of_birth {
        push_filter(&mut sql, &mut args, "date_of_birth =", Box::new(dob.format("%Y-%m-%d").to_string()));
    }
    sql.push_str(" ORDER BY last_name, first_name, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), parse_patient_row)?;
    rows.collect()
}

// ── Providers, operatories, schedules ──

pub fn insert_provider(conn: &Connection, provider: &Provider) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO providers (id, organization_id, name, specialty, active) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            provider.id,
            provider.organization_id,
            provider.name,
            provider.specialty,
            provider.active,
        ],
    )?;
    Ok(())
}

pub fn list_providers(conn: &Connection, org: &str) -> rusqlite::Result<Vec<Provider>> {
    let mut stmt = conn.prepare(
        "SELECT id, organization_id, name, specialty, active FROM providers
         WHERE organization_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![org], |row| {
        Ok(Provider {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            specialty: row.get(3)?,
            active: row.get(4)?,
        })
    })?;
    rows.collect()
}

pub fn insert_operatory(conn: &Connection, operatory: &Operatory) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO operatories (id, organization_id, name, active) VALUES (?1, ?2, ?3, ?4)",
        params![
            operatory.id,
            operatory.organization_id,
            operatory.name,
            operatory.active,
        ],
    )?;
    Ok(())
}

pub fn list_operatories(conn: &Connection, org: &str) -> rusqlite::Result<Vec<Operatory>> {
    let mut stmt = conn.prepare(
        "SELECT id, organization_id, name, active FROM operatories
         WHERE organization_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![org], |row| {
        Ok(Operatory {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            active: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn insert_schedule_block(conn: &Connection, block: &ScheduleBlock) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schedule_blocks (id, organization_id, provider_id, operatory_id, weekday, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.id,
            block.organization_id,
            block.provider_id,
            block.operatory_id,
            weekday_code(block.weekday),
            block.start_time.format("%H:%M").to_string(),
            block.end_time.format("%H:%M").to_string(),
        ],
    )?;
    Ok(())
}

pub fn list_schedule_blocks(
    conn: &Connection,
    org: &str,
    provider_id: Option<&str>,
) -> rusqlite::Result<Vec<ScheduleBlock>> {
    let mut stmt = conn.prepare(
        "SELECT id, organization_id, provider_id, operatory_id, weekday, start_time, end_time
         FROM schedule_blocks
         WHERE organization_id = ?1 AND (?2 IS NULL OR provider_id = ?2)
         ORDER BY provider_id, id",
    )?;
    let rows = stmt.query_map(params![org, provider_id], |row| {
        let weekday: String = row.get(4)?;
        Ok(ScheduleBlock {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            provider_id: row.get(2)?,
            operatory_id: row.get(3)?,
            weekday: parse_weekday(&weekday).map_err(|e| {
                conversion_error(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
            })?,
            start_time: time_col(row, 5)?,
            end_time: time_col(row, 6)?,
        })
    })?;
    rows.collect()
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, organization_id, patient_id, provider_id, operatory_id, start_time, duration_minutes, appointment_type, status, notes, created_at, updated_at";

fn parse_appointment_row(row: &Row) -> rusqlite::Result<Appointment> {
    let status: String = row.get(8)?;
    Ok(Appointment {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        patient_id: row.get(2)?,
        provider_id: row.get(3)?,
        operatory_id: row.get(4)?,
        start_time: dt_col(row, 5)?,
        duration_minutes: row.get(6)?,
        appointment_type: row.get(7)?,
        status: AppointmentStatus::parse(&status),
        notes: row.get(9)?,
        created_at: dt_col(row, 10)?,
        updated_at: dt_col(row, 11)?,
    })
}

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, organization_id, patient_id, provider_id, operatory_id, start_time, duration_minutes, appointment_type, status, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            appt.id,
            appt.organization_id,
            appt.patient_id,
            appt.provider_id,
            appt.operatory_id,
            fmt_dt(&appt.start_time),
            appt.duration_minutes,
            appt.appointment_type,
            appt.status.as_str(),
            appt.notes,
            fmt_dt(&appt.created_at),
            fmt_dt(&appt.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_appointment(
    conn: &Connection,
    org: &str,
    id: &str,
) -> rusqlite::Result<Option<Appointment>> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE organization_id = ?1 AND id = ?2"
    );
    match conn.query_row(&sql, params![org, id], parse_appointment_row) {
        Ok(a) => Ok(Some(a)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn find_appointments(
    conn: &Connection,
    org: &str,
    query: &AppointmentQuery,
) -> rusqlite::Result<Vec<Appointment>> {
    let mut sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE organization_id = ?1");
    let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(org.to_string())];

    if let Some(patient_id) = &query.patient_id {
        push_filter(&mut sql, &mut args, "patient_id =", Box::new(patient_id.clone()));
    }
    if let Some(provider_id) = &query.provider_id {
        push_filter(&mut sql, &mut args, "provider_id =", Box::new(provider_id.clone()));
    }
    if let Some(operatory_id) = &query.operatory_id {
        push_filter(&mut sql, &mut args, "operatory_id =", Box::new(operatory_id.clone()));
    }
    if let Some(from) = &query.date_from {
        let start = from.and_time(NaiveTime::default());
        push_filter(&mut sql, &mut args, "start_time >=", Box::new(fmt_dt(&start)));
    }
    if let Some(to) = &query.date_to {
        let end = to.and_hms_opt(23, 59, 59).unwrap_or_else(|| to.and_time(NaiveTime::default()));
        push_filter(&mut sql, &mut args, "start_time <=", Box::new(fmt_dt(&end)));
    }
    if !query.include_cancelled {
        sql.push_str(" AND status != 'cancelled'");
    }
    sql.push_str(" ORDER BY start_time ASC, provider_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), parse_appointment_row)?;
    rows.collect()
}

/// Active appointments that overlap `[start, end)` for the provider or the
/// operatory. Appointments never span midnight, so the scan is bounded to
/// the surrounding day.
pub fn overlapping_appointments(
    conn: &Connection,
    org: &str,
    provider_id: &str,
    operatory_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude_id: Option<&str>,
) -> rusqlite::Result<Vec<Appointment>> {
    let day_start = start.date().and_time(NaiveTime::default()) - chrono::Duration::days(1);
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE organization_id = ?1 AND (provider_id = ?2 OR operatory_id = ?3)
           AND status != 'cancelled' AND start_time >= ?4 AND start_time < ?5
           AND (?6 IS NULL OR id != ?6)
         ORDER BY start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            org,
            provider_id,
            operatory_id,
            fmt_dt(&day_start),
            fmt_dt(end),
            exclude_id
        ],
        parse_appointment_row,
    )?;
    let candidates: Vec<Appointment> = rows.collect::<rusqlite::Result<_>>()?;
    Ok(candidates
        .into_iter()
        .filter(|a| a.overlaps(*start, *end))
        .collect())
}

pub fn update_appointment_slot(
    conn: &Connection,
    org: &str,
    id: &str,
    provider_id: &str,
    operatory_id: &str,
    start: &NaiveDateTime,
    duration_minutes: i64,
    updated_at: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET provider_id = ?1, operatory_id = ?2, start_time = ?3, duration_minutes = ?4, updated_at = ?5
         WHERE id = ?6 AND organization_id = ?7",
        params![
            provider_id,
            operatory_id,
            fmt_dt(start),
            duration_minutes,
            fmt_dt(updated_at),
            id,
            org
        ],
    )?;
    Ok(count > 0)
}

pub fn update_appointment_status(
    conn: &Connection,
    org: &str,
    id: &str,
    status: AppointmentStatus,
    notes: Option<&str>,
    updated_at: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, notes = COALESCE(?2, notes), updated_at = ?3
         WHERE id = ?4 AND organization_id = ?5",
        params![status.as_str(), notes, fmt_dt(updated_at), id, org],
    )?;
    Ok(count > 0)
}
