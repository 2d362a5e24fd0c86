use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::patient::Patient;
use super::slot::{SlotCandidate, SlotQuery, TimeOfDay};

/// The booking operation a multi-turn exchange is working towards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Create,
    Reschedule,
    Cancel,
}

impl PendingAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "create" | "book" => Some(PendingAction::Create),
            "reschedule" => Some(PendingAction::Reschedule),
            "cancel" => Some(PendingAction::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PatientFacts {
    pub id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl PatientFacts {
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    }
}

/// A slot the caller explicitly accepted from the offered candidates.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectedSlot {
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub provider_id: String,
    pub provider_name: String,
    pub operatory_id: String,
}

impl From<&SlotCandidate> for SelectedSlot {
    fn from(c: &SlotCandidate) -> Self {
        Self {
            start: c.start,
            duration_minutes: c.duration_minutes,
            provider_id: c.provider_id.clone(),
            provider_name: c.provider_name.clone(),
            operatory_id: c.operatory_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AppointmentIntent {
    pub appointment_type: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_time: Option<NaiveTime>,
    pub time_of_day: Option<TimeOfDay>,
    /// Existing appointment being rescheduled or cancelled.
    pub target_appointment_id: Option<String>,
    /// Set once the caller's existing appointments have been read back.
    pub appointments_reviewed: bool,
    pub last_slot_query: Option<SlotQuery>,
    offered_slots: Vec<SlotCandidate>,
    selected_slot: Option<SelectedSlot>,
}

impl AppointmentIntent {
    pub fn offered_slots(&self) -> &[SlotCandidate] {
        &self.offered_slots
    }

    pub fn selected_slot(&self) -> Option<&SelectedSlot> {
        self.selected_slot.as_ref()
    }

    /// Replace the offered candidates. Any previous selection is dropped,
    /// since it no longer refers to an option on the table.
    pub fn offer_slots(&mut self, slots: Vec<SlotCandidate>) {
        self.offered_slots = slots.into_iter().filter(|s| s.is_free()).collect();
        self.selected_slot = None;
    }

    /// The only way a slot becomes selected: the caller affirmed the
    /// offered option at `index`.
    pub fn confirm_offered_slot(&mut self, index: usize) -> Option<&SelectedSlot> {
        let candidate = self.offered_slots.get(index)?;
        self.selected_slot = Some(SelectedSlot::from(candidate));
        self.selected_slot.as_ref()
    }
}

/// Facts collected so far in one call or chat session.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ConversationState {
    pub patient: PatientFacts,
    pub appointment_intent: AppointmentIntent,
    pub pending_action: Option<PendingAction>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateConflict {
    #[error("patient already identified as {current}; re-identification required to change it")]
    PatientIdentity {
        current: String,
        proposed: Option<String>,
    },
}

impl ConversationState {
    /// Shallow merge per field group. Absent fields are preserved; only an
    /// explicit [`Patch::Unset`] clears a fact. A resolved patient id can only
    /// be replaced when the update carries `reidentify`. On error nothing is
    /// applied.
    pub fn apply(&mut self, update: StateUpdate) -> Result<(), StateConflict> {
        if !update.reidentify {
            if let Some(current) = &self.patient.id {
                let proposed = match &update.patient.id {
                    Patch::Keep => None,
                    Patch::Set(id) if id == current => None,
                    Patch::Set(id) => Some(Some(id.clone())),
                    Patch::Unset => Some(None),
                };
                if let Some(proposed) = proposed {
                    return Err(StateConflict::PatientIdentity {
                        current: current.clone(),
                        proposed,
                    });
                }
            }
        }

        if update.reidentify {
            self.patient = PatientFacts::default();
            self.appointment_intent.target_appointment_id = None;
            self.appointment_intent.appointments_reviewed = false;
        }

        let p = update.patient;
        p.id.apply_to(&mut self.patient.id);
        p.first_name.apply_to(&mut self.patient.first_name);
        p.last_name.apply_to(&mut self.patient.last_name);
        p.phone.apply_to(&mut self.patient.phone);
        p.date_of_birth.apply_to(&mut self.patient.date_of_birth);

        let i = update.appointment_intent;
        let intent = &mut self.appointment_intent;
        i.appointment_type.apply_to(&mut intent.appointment_type);
        i.preferred_date.apply_to(&mut intent.preferred_date);
        i.preferred_time.apply_to(&mut intent.preferred_time);
        i.time_of_day.apply_to(&mut intent.time_of_day);
        i.target_appointment_id
            .apply_to(&mut intent.target_appointment_id);
        i.last_slot_query.apply_to(&mut intent.last_slot_query);
        if let Some(reviewed) = i.appointments_reviewed {
            intent.appointments_reviewed = reviewed;
        }
        if i.clear_selected_slot {
            intent.selected_slot = None;
        }

        update.pending_action.apply_to(&mut self.pending_action);
        Ok(())
    }

    /// Forget the finished booking workflow but keep who the caller is.
    pub fn complete_booking(&mut self) {
        self.appointment_intent = AppointmentIntent::default();
        self.pending_action = None;
    }
}

/// A three-way field update: leave alone, overwrite, or clear.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Unset,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn apply_to(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(v) => *slot = Some(v),
            Patch::Unset => *slot = None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `None` means "not mentioned", never "clear".
    fn from(value: Option<T>) -> Self {
        value.map_or(Patch::Keep, Patch::Set)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientUpdate {
    pub id: Patch<String>,
    pub first_name: Patch<String>,
    pub last_name: Patch<String>,
    pub phone: Patch<String>,
    pub date_of_birth: Patch<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentUpdate {
    pub appointment_type: Patch<String>,
    pub preferred_date: Patch<NaiveDate>,
    pub preferred_time: Patch<NaiveTime>,
    pub time_of_day: Patch<TimeOfDay>,
    pub target_appointment_id: Patch<String>,
    pub appointments_reviewed: Option<bool>,
    pub last_slot_query: Patch<SlotQuery>,
    pub clear_selected_slot: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub reidentify: bool,
    pub patient: PatientUpdate,
    pub appointment_intent: IntentUpdate,
    pub pending_action: Patch<PendingAction>,
}

impl StateUpdate {
    pub fn patient_identified(patient: &Patient) -> Self {
        Self {
            patient: PatientUpdate {
                id: Patch::Set(patient.id.clone()),
                first_name: Patch::Set(patient.first_name.clone()),
                last_name: Patch::Set(patient.last_name.clone()),
                phone: patient.phone.clone().into(),
                date_of_birth: patient.date_of_birth.into(),
            },
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StateUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::slot::Feasibility;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn candidate(start: &str) -> SlotCandidate {
        SlotCandidate {
            start: dt(start),
            duration_minutes: 30,
            provider_id: "prov-1".to_string(),
            provider_name: "Dr. Lee".to_string(),
            operatory_id: "op-1".to_string(),
            feasibility: Feasibility::Free,
        }
    }

    fn identified(id: &str) -> ConversationState {
        let mut state = ConversationState::default();
        state
            .apply(StateUpdate {
                patient: PatientUpdate {
                    id: Patch::Set(id.to_string()),
                    first_name: Patch::Set("Jane".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        state
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut state = identified("pat-1");
        state.pending_action = Some(PendingAction::Create);
        let before = state.clone();
        state.apply(StateUpdate::default()).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn test_omitted_fields_are_preserved() {
        let mut state = identified("pat-1");
        state
            .apply(StateUpdate {
                patient: PatientUpdate {
                    phone: Patch::Set("5550100".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.patient.first_name.as_deref(), Some("Jane"));
        assert_eq!(state.patient.phone.as_deref(), Some("5550100"));
    }

    #[test]
    fn test_unset_clears_field() {
        let mut state = identified("pat-1");
        state
            .apply(StateUpdate {
                patient: PatientUpdate {
                    first_name: Patch::Unset,
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.patient.first_name, None);
        assert_eq!(state.patient.id.as_deref(), Some("pat-1"));
    }

    #[test]
    fn test_patient_id_not_overwritten_without_reidentify() {
        let mut state = identified("pat-1");
        let before = state.clone();
        let err = state
            .apply(StateUpdate {
                patient: PatientUpdate {
                    id: Patch::Set("pat-2".to_string()),
                    first_name: Patch::Set("John".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StateConflict::PatientIdentity { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn test_same_patient_id_is_not_a_conflict() {
        let mut state = identified("pat-1");
        assert!(state
            .apply(StateUpdate {
                patient: PatientUpdate {
                    id: Patch::Set("pat-1".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .is_ok());
    }

    #[test]
    fn test_reidentify_replaces_patient() {
        let mut state = identified("pat-1");
        state
            .apply(StateUpdate {
                reidentify: true,
                patient: PatientUpdate {
                    first_name: Patch::Set("John".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.patient.id, None);
        assert_eq!(state.patient.first_name.as_deref(), Some("John"));
    }

    #[test]
    fn test_selected_slot_only_from_offered() {
        let mut intent = AppointmentIntent::default();
        assert!(intent.confirm_offered_slot(0).is_none());

        intent.offer_slots(vec![candidate("2030-01-07 09:00"), candidate("2030-01-07 09:30")]);
        assert!(intent.selected_slot().is_none());

        let selected = intent.confirm_offered_slot(1).unwrap();
        assert_eq!(selected.start, dt("2030-01-07 09:30"));
        assert!(intent.confirm_offered_slot(5).is_none());
    }

    #[test]
    fn test_new_offer_drops_selection() {
        let mut intent = AppointmentIntent::default();
        intent.offer_slots(vec![candidate("2030-01-07 09:00")]);
        intent.confirm_offered_slot(0);
        intent.offer_slots(vec![candidate("2030-01-08 09:00")]);
        assert!(intent.selected_slot().is_none());
    }

    #[test]
    fn test_offer_discards_infeasible_candidates() {
        let mut intent = AppointmentIntent::default();
        let mut busy = candidate("2030-01-07 10:00");
        busy.feasibility = Feasibility::Conflict;
        intent.offer_slots(vec![busy, candidate("2030-01-07 11:00")]);
        assert_eq!(intent.offered_slots().len(), 1);
    }

    #[test]
    fn test_clear_selected_slot_flag() {
        let mut state = ConversationState::default();
        state
            .appointment_intent
            .offer_slots(vec![candidate("2030-01-07 09:00")]);
        state.appointment_intent.confirm_offered_slot(0);
        state
            .apply(StateUpdate {
                appointment_intent: IntentUpdate {
                    clear_selected_slot: true,
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        assert!(state.appointment_intent.selected_slot().is_none());
        assert_eq!(state.appointment_intent.offered_slots().len(), 1);
    }

    #[test]
    fn test_complete_booking_keeps_patient() {
        let mut state = identified("pat-1");
        state.pending_action = Some(PendingAction::Create);
        state
            .appointment_intent
            .offer_slots(vec![candidate("2030-01-07 09:00")]);
        state.complete_booking();
        assert_eq!(state.patient.id.as_deref(), Some("pat-1"));
        assert!(state.appointment_intent.offered_slots().is_empty());
        assert_eq!(state.pending_action, None);
    }
}
