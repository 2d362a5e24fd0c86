use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::patient::normalize_phone;
use super::session::ConversationState;
use super::slot::TimeOfDay;

/// Backend operations a function spec can map to. Several specs may share
/// one operation with different parameter contracts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SearchPatients,
    FindOrCreatePatient,
    CreatePatient,
    UpdatePatient,
    SearchAppointments,
    FindSlots,
    CheckSlot,
    CreateAppointment,
    UpdateAppointment,
    CancelAppointment,
    ListProviders,
    ListOperatories,
    ListSchedules,
}

impl Operation {
    /// Operations that write an appointment at a chosen time.
    pub fn commits_booking(&self) -> bool {
        matches!(self, Operation::CreateAppointment | Operation::UpdateAppointment)
    }

    pub fn identifies_patient(&self) -> bool {
        matches!(
            self,
            Operation::SearchPatients | Operation::FindOrCreatePatient | Operation::CreatePatient
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Id,
    Integer,
    Date,
    DateTime,
    Phone,
    TimeOfDay,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl ParamKind {
    /// Coerce a loosely-typed value into the canonical JSON shape the
    /// operation deserializes. `None` means the value is unusable.
    pub fn normalize(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => None,
            (ParamKind::String, Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| json!(s))
            }
            (ParamKind::String, Value::Number(n)) => Some(json!(n.to_string())),
            (ParamKind::Id, Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| json!(s))
            }
            (ParamKind::Id, Value::Number(n)) => Some(json!(n.to_string())),
            (ParamKind::Integer, Value::Number(n)) => n.as_i64().map(|v| json!(v)),
            (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|v| json!(v)),
            (ParamKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date()))
                .map(|d| json!(d.format("%Y-%m-%d").to_string())),
            (ParamKind::DateTime, Value::String(s)) => {
                parse_datetime(s).map(|dt| json!(format_datetime(&dt)))
            }
            (ParamKind::Phone, Value::String(s)) => normalize_phone(s).map(|p| json!(p)),
            (ParamKind::Phone, Value::Number(n)) => normalize_phone(&n.to_string()).map(|p| json!(p)),
            (ParamKind::TimeOfDay, Value::String(s)) => {
                TimeOfDay::parse(s).and_then(|t| serde_json::to_value(t).ok())
            }
            _ => None,
        }
    }
}

/// Which conversation fact fills a parameter when the caller omitted it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBinding {
    PatientId,
    PatientFirstName,
    PatientLastName,
    PatientPhone,
    PatientDateOfBirth,
    AppointmentType,
    PreferredDate,
    TimeOfDay,
    SelectedStart,
    SelectedProviderId,
    SelectedOperatoryId,
    SelectedDuration,
    TargetAppointmentId,
}

impl StateBinding {
    pub fn lookup(&self, state: &ConversationState) -> Option<Value> {
        let patient = &state.patient;
        let intent = &state.appointment_intent;
        let selected = intent.selected_slot();
        match self {
            StateBinding::PatientId => patient.id.clone().map(Value::String),
            StateBinding::PatientFirstName => patient.first_name.clone().map(Value::String),
            StateBinding::PatientLastName => patient.last_name.clone().map(Value::String),
            StateBinding::PatientPhone => patient.phone.clone().map(Value::String),
            StateBinding::PatientDateOfBirth => patient
                .date_of_birth
                .map(|d| json!(d.format("%Y-%m-%d").to_string())),
            StateBinding::AppointmentType => intent.appointment_type.clone().map(Value::String),
            StateBinding::PreferredDate => intent
                .preferred_date
                .map(|d| json!(d.format("%Y-%m-%d").to_string())),
            StateBinding::TimeOfDay => intent
                .time_of_day
                .and_then(|t| serde_json::to_value(t).ok()),
            StateBinding::SelectedStart => selected.map(|s| json!(format_datetime(&s.start))),
            StateBinding::SelectedProviderId => selected.map(|s| json!(s.provider_id)),
            StateBinding::SelectedOperatoryId => selected.map(|s| json!(s.operatory_id)),
            StateBinding::SelectedDuration => selected.map(|s| json!(s.duration_minutes)),
            StateBinding::TargetAppointmentId => {
                intent.target_appointment_id.clone().map(Value::String)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Literal(Value),
    /// Delegated to the backend's own default-room policy.
    OrganizationDefaultOperatory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// How to ask the caller for this value.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub binds: Option<StateBinding>,
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Inclusive bounds for integer parameters.
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

impl ParamSpec {
    /// [`ParamKind::normalize`] plus the declared bounds.
    pub fn normalize(&self, value: &Value) -> Option<Value> {
        let value = self.kind.normalize(value)?;
        if let Some(n) = value.as_i64() {
            if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
                return None;
            }
        }
        Some(value)
    }

    /// Identifiers come from lookups and state, never from the caller's words.
    pub fn extractable(&self) -> bool {
        self.kind != ParamKind::Id
    }

    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    pub category: String,
    pub description: String,
    pub operation: Operation,
    #[serde(default)]
    pub required: Vec<ParamSpec>,
    #[serde(default)]
    pub optional: Vec<ParamSpec>,
}

impl FunctionSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .find(|p| p.name == name)
    }

    /// The model-facing description of this function.
    pub fn capability(&self) -> Value {
        json!({
            "name": self.name,
            "category": self.category,
            "description": self.description,
            "required": self.required.iter().map(|p| json!({"name": p.name, "type": p.kind})).collect::<Vec<_>>(),
            "optional": self.optional.iter().map(|p| json!({"name": p.name, "type": p.kind})).collect::<Vec<_>>(),
        })
    }
}

/// A function call whose arguments are complete for its operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedCall {
    pub function: String,
    pub operation: Operation,
    pub arguments: Map<String, Value>,
}

impl ResolvedCall {
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.arguments.clone()))
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(|v| v.as_str())
    }
}
