use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::BookingError;
use crate::models::{
    appointment_end, normalize_phone, Appointment, AppointmentChanges, AppointmentQuery, AppointmentStatus,
    NewAppointment, NewPatient, Operatory, Patient, PatientChanges, PatientQuery, Provider,
    ScheduleBlock, MAX_APPOINTMENT_MINUTES,
};

/// The scheduling system of record. Every call is scoped to exactly one
/// organization, supplied by the transport and never inferred.
#[async_trait]
pub trait BookingOperations: Send + Sync {
    async fn search_patients(&self, org: &str, query: &PatientQuery) -> Result<Vec<Patient>, BookingError>;

    async fn create_patient(&self, org: &str, patient: &NewPatient) -> Result<Patient, BookingError>;

    async fn update_patient(&self, org: &str, changes: &PatientChanges) -> Result<Patient, BookingError>;

    async fn search_appointments(
        &self,
        org: &str,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, BookingError>;

    async fn get_appointment(&self, org: &str, appointment_id: &str) -> Result<Appointment, BookingError>;

    /// Fails with `Conflict` if the provider or operatory is already booked.
    async fn create_appointment(
        &self,
        org: &str,
        appointment: &NewAppointment,
    ) -> Result<Appointment, BookingError>;

    async fn update_appointment(
        &self,
        org: &str,
        changes: &AppointmentChanges,
    ) -> Result<Appointment, BookingError>;

    async fn cancel_appointment(
        &self,
        org: &str,
        appointment_id: &str,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError>;

    async fn list_providers(&self, org: &str) -> Result<Vec<Provider>, BookingError>;

    async fn list_operatories(&self, org: &str) -> Result<Vec<Operatory>, BookingError>;

    async fn list_schedules(
        &self,
        org: &str,
        provider_id: Option<&str>,
    ) -> Result<Vec<ScheduleBlock>, BookingError>;

    /// The room used when a workflow does not ask for a specific one.
    async fn default_operatory(&self, org: &str) -> Result<Operatory, BookingError>;

    async fn has_conflict(
        &self,
        org: &str,
        provider_id: &str,
        operatory_id: &str,
        start: NaiveDateTime,
        duration_minutes: i64,
        exclude_appointment_id: Option<&str>,
    ) -> Result<bool, BookingError>;
}

pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn required_name(value: &str, field: &str) -> Result<String, BookingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BookingError::ValidationFailed(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn active_provider(conn: &Connection, org: &str, id: &str) -> Result<Provider, BookingError> {
    queries::list_providers(conn, org)?
        .into_iter()
        .find(|p| p.id == id && p.active)
        .ok_or_else(|| BookingError::NotFound(format!("provider {id}")))
}

fn active_operatory(conn: &Connection, org: &str, id: &str) -> Result<Operatory, BookingError> {
    queries::list_operatories(conn, org)?
        .into_iter()
        .find(|o| o.id == id && o.active)
        .ok_or_else(|| BookingError::NotFound(format!("operatory {id}")))
}

fn slot_end(start: &NaiveDateTime, duration_minutes: i64) -> Result<NaiveDateTime, BookingError> {
    appointment_end(*start, duration_minutes).ok_or_else(|| {
        BookingError::ValidationFailed(format!(
            "duration must be between 1 and {MAX_APPOINTMENT_MINUTES} minutes"
        ))
    })
}

fn ensure_free(
    conn: &Connection,
    org: &str,
    provider_id: &str,
    operatory_id: &str,
    start: &NaiveDateTime,
    duration_minutes: i64,
    exclude: Option<&str>,
) -> Result<(), BookingError> {
    let end = slot_end(start, duration_minutes)?;
    let clashes =
        queries::overlapping_appointments(conn, org, provider_id, operatory_id, start, &end, exclude)?;
    if let Some(existing) = clashes.first() {
        return Err(BookingError::Conflict(format!(
            "{} is already taken (appointment {})",
            start.format("%Y-%m-%d %H:%M"),
            existing.id
        )));
    }
    Ok(())
}

#[async_trait]
impl BookingOperations for SqliteBackend {
    async fn search_patients(&self, org: &str, query: &PatientQuery) -> Result<Vec<Patient>, BookingError> {
        if query.is_empty() {
            return Err(BookingError::ValidationFailed(
                "a name, phone or date of birth is needed to search".to_string(),
            ));
        }
        let mut query = query.clone();
        if let Some(phone) = &query.phone {
            query.phone = Some(normalize_phone(phone).ok_or_else(|| {
                BookingError::ValidationFailed(format!("'{phone}' is not a phone number"))
            })?);
        }
        let db = self.db.lock().unwrap();
        Ok(queries::find_patients(&db, org, &query)?)
    }

    async fn create_patient(&self, org: &str, patient: &NewPatient) -> Result<Patient, BookingError> {
        let phone = normalize_phone(&patient.phone).ok_or_else(|| {
            BookingError::ValidationFailed(format!("'{}' is not a phone number", patient.phone))
        })?;
        let ts = now();
        let record = Patient {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: org.to_string(),
            first_name: required_name(&patient.first_name, "first name")?,
            last_name: required_name(&patient.last_name, "last name")?,
            phone: Some(phone),
            email: patient.email.clone(),
            date_of_birth: patient.date_of_birth,
            created_at: ts,
            updated_at: ts,
        };
        let db = self.db.lock().unwrap();
        queries::insert_patient(&db, &record)?;
        tracing::info!(organization_id = org, patient_id = %record.id, "created patient");
        Ok(record)
    }

    async fn update_patient(&self, org: &str, changes: &PatientChanges) -> Result<Patient, BookingError> {
        let db = self.db.lock().unwrap();
        let mut patient = queries::get_patient(&db, org, &changes.patient_id)?
            .ok_or_else(|| BookingError::NotFound(format!("patient {}", changes.patient_id)))?;

        if let Some(first) = &changes.first_name {
            patient.first_name = required_name(first, "first name")?;
        }
        if let Some(last) = &changes.last_name {
            patient.last_name = required_name(last, "last name")?;
        }
        if let Some(phone) = &changes.phone {
            patient.phone = Some(normalize_phone(phone).ok_or_else(|| {
                BookingError::ValidationFailed(format!("'{phone}' is not a phone number"))
            })?);
        }
        if changes.email.is_some() {
            patient.email = changes.email.clone();
        }
        if changes.date_of_birth.is_some() {
            patient.date_of_birth = changes.date_of_birth;
        }
        patient.updated_at = now();

        queries::update_patient(&db, &patient)?;
        Ok(patient)
    }

    async fn search_appointments(
        &self,
        org: &str,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, BookingError> {
        let db = self.db.lock().unwrap();
        Ok(queries::find_appointments(&db, org, query)?)
    }

    async fn get_appointment(&self, org: &str, appointment_id: &str) -> Result<Appointment, BookingError> {
        let db = self.db.lock().unwrap();
        queries::get_appointment(&db, org, appointment_id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {appointment_id}")))
    }

    async fn create_appointment(
        &self,
        org: &str,
        appointment: &NewAppointment,
    ) -> Result<Appointment, BookingError> {
        slot_end(&appointment.start_time, appointment.duration_minutes)?;
        let db = self.db.lock().unwrap();

        queries::get_patient(&db, org, &appointment.patient_id)?
            .ok_or_else(|| BookingError::NotFound(format!("patient {}", appointment.patient_id)))?;
        active_provider(&db, org, &appointment.provider_id)?;
        active_operatory(&db, org, &appointment.operatory_id)?;

        // Checked and written under one lock so racing sessions cannot both win.
        ensure_free(
            &db,
            org,
            &appointment.provider_id,
            &appointment.operatory_id,
            &appointment.start_time,
            appointment.duration_minutes,
            None,
        )?;

        let ts = now();
        let record = Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: org.to_string(),
            patient_id: appointment.patient_id.clone(),
            provider_id: appointment.provider_id.clone(),
            operatory_id: appointment.operatory_id.clone(),
            start_time: appointment.start_time,
            duration_minutes: appointment.duration_minutes,
            appointment_type: appointment.appointment_type.clone(),
            status: AppointmentStatus::Scheduled,
            notes: appointment.notes.clone(),
            created_at: ts,
            updated_at: ts,
        };
        queries::insert_appointment(&db, &record)?;
        tracing::info!(
            organization_id = org,
            appointment_id = %record.id,
            start = %record.start_time,
            "created appointment"
        );
        Ok(record)
    }

    async fn update_appointment(
        &self,
        org: &str,
        changes: &AppointmentChanges,
    ) -> Result<Appointment, BookingError> {
        if let Some(minutes) = changes.duration_minutes {
            slot_end(&changes.start_time, minutes)?;
        }
        let db = self.db.lock().unwrap();

        let existing = queries::get_appointment(&db, org, &changes.appointment_id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {}", changes.appointment_id)))?;
        if !existing.is_active() {
            return Err(BookingError::ValidationFailed(
                "that appointment has been cancelled".to_string(),
            ));
        }
        active_provider(&db, org, &changes.provider_id)?;
        active_operatory(&db, org, &changes.operatory_id)?;

        let duration = changes.duration_minutes.unwrap_or(existing.duration_minutes);
        ensure_free(
            &db,
            org,
            &changes.provider_id,
            &changes.operatory_id,
            &changes.start_time,
            duration,
            Some(&existing.id),
        )?;

        queries::update_appointment_slot(
            &db,
            org,
            &existing.id,
            &changes.provider_id,
            &changes.operatory_id,
            &changes.start_time,
            duration,
            &now(),
        )?;
        queries::get_appointment(&db, org, &existing.id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {}", existing.id)))
    }

    async fn cancel_appointment(
        &self,
        org: &str,
        appointment_id: &str,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        let db = self.db.lock().unwrap();
        let existing = queries::get_appointment(&db, org, appointment_id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {appointment_id}")))?;
        if !existing.is_active() {
            return Err(BookingError::ValidationFailed(
                "that appointment is already cancelled".to_string(),
            ));
        }
        queries::update_appointment_status(
            &db,
            org,
            appointment_id,
            AppointmentStatus::Cancelled,
            reason,
            &now(),
        )?;
        queries::get_appointment(&db, org, appointment_id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {appointment_id}")))
    }

    async fn list_providers(&self, org: &str) -> Result<Vec<Provider>, BookingError> {
        let db = self.db.lock().unwrap();
        Ok(queries::list_providers(&db, org)?)
    }

    async fn list_operatories(&self, org: &str) -> Result<Vec<Operatory>, BookingError> {
        let db = self.db.lock().unwrap();
        Ok(queries::list_operatories(&db, org)?)
    }

    async fn list_schedules(
        &self,
        org: &str,
        provider_id: Option<&str>,
    ) -> Result<Vec<ScheduleBlock>, BookingError> {
        let db = self.db.lock().unwrap();
        Ok(queries::list_schedule_blocks(&db, org, provider_id)?)
    }

    async fn default_operatory(&self, org: &str) -> Result<Operatory, BookingError> {
        let db = self.db.lock().unwrap();
        queries::list_operatories(&db, org)?
            .into_iter()
            .find(|o| o.active)
            .ok_or_else(|| BookingError::NotFound("active operatory".to_string()))
    }

    async fn has_conflict(
        &self,
        org: &str,
        provider_id: &str,
        operatory_id: &str,
        start: NaiveDateTime,
        duration_minutes: i64,
        exclude_appointment_id: Option<&str>,
    ) -> Result<bool, BookingError> {
        let end = slot_end(&start, duration_minutes)?;
        let db = self.db.lock().unwrap();
        let clashes = queries::overlapping_appointments(
            &db,
            org,
            provider_id,
            operatory_id,
            &start,
            &end,
            exclude_appointment_id,
        )?;
        Ok(!clashes.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db;
    use crate::models::practice::parse_weekday;
    use chrono::NaiveTime;

    pub const ORG: &str = "org-1";

    /// One org, two providers working Mon-Fri 09:00-12:00, two operatories.
    pub fn seeded_backend() -> SqliteBackend {
        let conn = db::init_db(":memory:").unwrap();
        queries::insert_organization(&conn, ORG, "Bright Smiles", None).unwrap();
        queries::insert_organization(&conn, "org-2", "Other Practice", None).unwrap();
        for (id, name) in [("prov-a", "Dr. Adams"), ("prov-b", "Dr. Brown")] {
            queries::insert_provider(
                &conn,
                &Provider {
                    id: id.to_string(),
                    organization_id: ORG.to_string(),
                    name: name.to_string(),
                    specialty: None,
                    active: true,
                },
            )
            .unwrap();
            for day in ["mon", "tue", "wed", "thu", "fri"] {
                queries::insert_schedule_block(
                    &conn,
                    &ScheduleBlock {
                        id: format!("{id}-{day}"),
                        organization_id: ORG.to_string(),
                        provider_id: id.to_string(),
                        operatory_id: None,
                        weekday: parse_weekday(day).unwrap(),
                        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                    },
                )
                .unwrap();
            }
        }
        for (id, name) in [("op-1", "Chair 1"), ("op-2", "Chair 2")] {
            queries::insert_operatory(
                &conn,
                &Operatory {
                    id: id.to_string(),
                    organization_id: ORG.to_string(),
                    name: name.to_string(),
                    active: true,
                },
            )
            .unwrap();
        }
        SqliteBackend::new(Arc::new(Mutex::new(conn)))
    }

    pub async fn patient(backend: &SqliteBackend, first: &str, last: &str, phone: &str) -> Patient {
        backend
            .create_patient(
                ORG,
                &NewPatient {
                    first_name: first.to_string(),
                    last_name: last.to_string(),
                    phone: phone.to_string(),
                    email: None,
                    date_of_birth: None,
                },
            )
            .await
            .unwrap()
    }

    pub fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }
}
