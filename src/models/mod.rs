pub mod appointment;
pub mod function;
pub mod patient;
pub mod practice;
pub mod session;
pub mod slot;
pub mod tenant;
pub mod transport;
pub mod turn;

pub use appointment::{
    appointment_end, Appointment, AppointmentChanges, AppointmentQuery, AppointmentStatus, NewAppointment,
    MAX_APPOINTMENT_MINUTES,
};
pub use function::{DefaultValue, FunctionSpec, Operation, ParamKind, ParamSpec, ResolvedCall, StateBinding};
pub use patient::{normalize_phone, NewPatient, Patient, PatientChanges, PatientQuery};
pub use practice::{Operatory, Provider, ScheduleBlock};
pub use session::{
    AppointmentIntent, ConversationState, IntentUpdate, Patch, PatientFacts, PatientUpdate,
    PendingAction, SelectedSlot, StateConflict, StateUpdate,
};
pub use slot::{Feasibility, SlotCandidate, SlotQuery, TimeOfDay};
pub use tenant::TenantConfig;
pub use transport::TransportProfile;
pub use turn::{Role, TurnMessage};
