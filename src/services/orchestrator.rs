use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::OrchestratorSettings;
use crate::errors::{BookingError, TurnError};
use crate::models::practice::describe_hours;
use crate::models::{
    Appointment, AppointmentChanges, AppointmentQuery, ConversationState, FunctionSpec,
    IntentUpdate, NewAppointment, NewPatient, Operation, Operatory, Patch, Patient,
    PatientChanges, PatientQuery, PendingAction, Provider, ResolvedCall, ScheduleBlock,
    SlotCandidate, SlotQuery, StateUpdate, TenantConfig, TransportProfile, TurnMessage,
};
use crate::services::ai::planner::{plan_turn, Plan, PlannedCall, PlanningContext};
use crate::services::ai::LlmProvider;
use crate::services::availability::{self, PlannerError, SlotCheckArgs, SlotSearchArgs};
use crate::services::backend::BookingOperations;
use crate::services::dispatch::DispatchTable;
use crate::services::greeting::HandoffSummary;
use crate::services::notifications::{BookingEvent, BookingEventKind};
use crate::services::reply;
use crate::services::resolver::{ParameterResolver, ResolveError};
use crate::services::slot_choice::match_offered_slot;

/// Runs automatically before a reschedule so the caller hears their
/// existing appointments first.
pub const REVIEW_FUNCTION: &str = "GetPatientAppointments";

const ESCALATION_REPLY: &str =
    "I'm having trouble with this request. Let me get a human to help you.";
const TRY_AGAIN_REPLY: &str =
    "Sorry, I'm having trouble reaching our scheduling system right now. Please try again in a moment.";
const FALLBACK_REPLY: &str = "How can I help you with your appointment today?";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Planning,
    Resolving,
    Executing,
    StateUpdate,
    Responding,
    Clarifying,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// `Responding` or `Clarifying`.
    pub phase: TurnPhase,
    /// Committed booking changes, for the notifier.
    pub events: Vec<BookingEvent>,
    pub escalated: bool,
}

pub struct TurnContext<'a> {
    pub session_id: &'a str,
    pub organization_id: &'a str,
    pub tenant: &'a TenantConfig,
    pub transport: &'a TransportProfile,
    /// Prior turns plus the current utterance as the last user message.
    pub history: &'a [TurnMessage],
    pub utterance: &'a str,
    pub handoff: Option<&'a HandoffSummary>,
    pub now: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    appointment_id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// What a backend operation produced, before it is folded into state.
enum Executed {
    Patients(Vec<Patient>),
    Identified(Patient),
    PatientUpdated(Patient),
    Appointments {
        appointments: Vec<Appointment>,
        patient_id: Option<String>,
    },
    Slots {
        query: SlotQuery,
        slots: Vec<SlotCandidate>,
    },
    SlotCheck(SlotCandidate),
    Booked(Appointment),
    Rescheduled(Appointment),
    Cancelled(Appointment),
    Providers(Vec<Provider>),
    Operatories(Vec<Operatory>),
    Schedules(Vec<ScheduleBlock>),
}

/// How one planned call ended.
enum Step {
    Continue { result: Value, say: Option<String> },
    /// Required input is missing; ask and end the turn.
    Clarify(String),
    /// Recoverable outcome that ends the turn's remaining calls.
    Stop(String),
    /// Transient failure after the retry budget was spent.
    Failed(String),
}

#[derive(Default)]
struct TurnRun {
    results: Vec<Value>,
    says: Vec<String>,
    events: Vec<BookingEvent>,
    committed: bool,
    retry_used: bool,
}

impl TurnRun {
    fn with_says(&self, tail: String) -> String {
        if self.says.is_empty() {
            tail
        } else {
            format!("{} {tail}", self.says.join(" "))
        }
    }
}

fn planner_failure(e: PlannerError) -> BookingError {
    match e {
        PlannerError::ProviderNotFound(id) => BookingError::NotFound(format!("provider {id}")),
        PlannerError::OperatoryNotFound(id) => BookingError::NotFound(format!("operatory {id}")),
        PlannerError::InvalidQuery(msg) => BookingError::ValidationFailed(msg),
        PlannerError::Backend(e) => e,
    }
}

/// Patient records are only read or changed for the identified caller.
fn ensure_own_record(patient_id: &str, working: &ConversationState) -> Result<(), BookingError> {
    match &working.patient.id {
        Some(own) if own == patient_id => Ok(()),
        _ => Err(BookingError::NotFound(format!("patient {patient_id}"))),
    }
}

fn invalid_args(e: serde_json::Error) -> BookingError {
    BookingError::ValidationFailed(format!("bad arguments: {e}"))
}

fn tail(history: &[TurnMessage], n: usize) -> &[TurnMessage] {
    &history[history.len().saturating_sub(n)..]
}

/// Distinct start times only, so "the 9:30 one" names exactly one option.
fn choose_offers(slots: Vec<SlotCandidate>, max: usize) -> Vec<SlotCandidate> {
    let mut seen = HashSet::new();
    slots
        .into_iter()
        .filter(|s| s.is_free() && seen.insert(s.start))
        .take(max)
        .collect()
}

/// The function-calling loop for one turn of one session.
pub struct Orchestrator<'a> {
    llm: &'a dyn LlmProvider,
    backend: &'a dyn BookingOperations,
    table: &'a DispatchTable,
    settings: &'a OrchestratorSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        llm: &'a dyn LlmProvider,
        backend: &'a dyn BookingOperations,
        table: &'a DispatchTable,
        settings: &'a OrchestratorSettings,
    ) -> Self {
        Self {
            llm,
            backend,
            table,
            settings,
        }
    }

    fn enter(&self, ctx: &TurnContext<'_>, phase: TurnPhase) {
        tracing::debug!(
            session_id = ctx.session_id,
            organization_id = ctx.organization_id,
            phase = ?phase,
            "turn phase"
        );
    }

    /// Runs one turn against `state`. The turn works on a copy; the copy
    /// replaces `state` unless the turn ends in an unrecovered failure.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        ctx: &TurnContext<'_>,
    ) -> Result<TurnOutcome, TurnError> {
        let mut working = state.clone();
        let mut run = TurnRun::default();

        let offered = working.appointment_intent.offered_slots();
        if let Some(index) = match_offered_slot(ctx.utterance, offered) {
            if let Some(slot) = working.appointment_intent.confirm_offered_slot(index) {
                tracing::info!(
                    session_id = ctx.session_id,
                    start = %slot.start,
                    provider_id = %slot.provider_id,
                    "caller confirmed an offered slot"
                );
            }
        }

        for iteration in 0..self.settings.max_iterations {
            self.enter(ctx, TurnPhase::Planning);
            let Some(plan) = self.plan_with_retry(&working, ctx, &run).await else {
                return Ok(self.finish_failed(state, working, run, TRY_AGAIN_REPLY.to_string()));
            };
            tracing::info!(
                session_id = ctx.session_id,
                iteration,
                calls = ?plan.calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                needs_results = plan.needs_results,
                "planned"
            );

            if let Err(conflict) = working.apply(plan.facts.to_update()) {
                tracing::warn!(session_id = ctx.session_id, error = %conflict, "ignoring stated facts");
            }

            if plan.calls.is_empty() {
                let reply = self.final_reply(plan.reply, &run, false);
                return Ok(self.finish(state, working, run, reply, TurnPhase::Responding));
            }

            for call in &plan.calls {
                match self.step(&mut working, call, ctx, &mut run).await? {
                    Step::Continue { result, say } => {
                        run.results.push(result);
                        if let Some(say) = say {
                            run.says.push(say);
                        }
                    }
                    Step::Clarify(question) => {
                        let reply = run.with_says(question);
                        return Ok(self.finish(state, working, run, reply, TurnPhase::Clarifying));
                    }
                    Step::Stop(message) => {
                        let reply = run.with_says(message);
                        return Ok(self.finish(state, working, run, reply, TurnPhase::Responding));
                    }
                    Step::Failed(message) => {
                        return Ok(self.finish_failed(state, working, run, message));
                    }
                }
            }

            if !plan.needs_results {
                let reply = self.final_reply(plan.reply, &run, true);
                return Ok(self.finish(state, working, run, reply, TurnPhase::Responding));
            }
        }

        tracing::warn!(
            session_id = ctx.session_id,
            max_iterations = self.settings.max_iterations,
            "turn exceeded planning budget, escalating"
        );
        let mut outcome = self.finish(
            state,
            working,
            run,
            ESCALATION_REPLY.to_string(),
            TurnPhase::Responding,
        );
        outcome.escalated = true;
        Ok(outcome)
    }

    async fn plan_with_retry(
        &self,
        working: &ConversationState,
        ctx: &TurnContext<'_>,
        run: &TurnRun,
    ) -> Option<Plan> {
        let capabilities = self.table.capability_list();
        let note = ctx.handoff.map(|h| h.describe());
        let planning = PlanningContext {
            tenant: ctx.tenant,
            transport: ctx.transport,
            capabilities: &capabilities,
            state: working,
            now: ctx.now,
            results: &run.results,
            handoff_note: note.as_deref(),
        };

        for attempt in 0..2 {
            match plan_turn(self.llm, &planning, ctx.history).await {
                Ok(plan) => return Some(plan),
                Err(e) => {
                    tracing::warn!(session_id = ctx.session_id, attempt, error = %e, "decision step failed");
                }
            }
        }
        None
    }

    /// The model's own reply is only trusted when it could see the results.
    /// Any claim of a booking change without a committed write is replaced.
    fn final_reply(&self, model_reply: Option<String>, run: &TurnRun, prefer_results: bool) -> String {
        if prefer_results && !run.says.is_empty() {
            return run.says.join(" ");
        }
        match model_reply {
            Some(text) if reply::claims_commitment(&text) && !run.committed => {
                tracing::warn!(reply = %text, "replacing unbacked confirmation");
                if run.says.is_empty() {
                    "I haven't made any changes to your appointments yet. What would you like to do?"
                        .to_string()
                } else {
                    run.says.join(" ")
                }
            }
            Some(text) => text,
            None if !run.says.is_empty() => run.says.join(" "),
            None => FALLBACK_REPLY.to_string(),
        }
    }

    fn finish(
        &self,
        state: &mut ConversationState,
        working: ConversationState,
        run: TurnRun,
        reply: String,
        phase: TurnPhase,
    ) -> TurnOutcome {
        *state = working;
        TurnOutcome {
            reply,
            phase,
            events: run.events,
            escalated: false,
        }
    }

    /// Ends the turn after an unrecovered failure. State changes are kept
    /// only if a write already went through.
    fn finish_failed(
        &self,
        state: &mut ConversationState,
        working: ConversationState,
        run: TurnRun,
        reply: String,
    ) -> TurnOutcome {
        if run.committed {
            *state = working;
        }
        TurnOutcome {
            reply,
            phase: TurnPhase::Responding,
            events: run.events,
            escalated: false,
        }
    }

    fn capability_refusal(&self, operation: Operation, tenant: &TenantConfig) -> Option<String> {
        let what = match operation {
            Operation::CreateAppointment if !tenant.capabilities.can_book => "book new appointments",
            Operation::UpdateAppointment if !tenant.capabilities.can_reschedule => "reschedule appointments",
            Operation::CancelAppointment if !tenant.capabilities.can_cancel => "cancel appointments",
            _ => return None,
        };
        let contact = if tenant.practice.phone.is_empty() {
            "please contact the office directly".to_string()
        } else {
            format!("please call the office at {}", tenant.practice.phone)
        };
        Some(format!("I'm not able to {what} here, so {contact}."))
    }

    fn pick_a_slot_prompt(&self, working: &ConversationState, ctx: &TurnContext<'_>) -> String {
        let offered = working.appointment_intent.offered_slots();
        if offered.is_empty() {
            "Let me find an open time first. What day works best for you?".to_string()
        } else {
            format!("Just to confirm the time first. {}", reply::offer(offered, ctx.transport))
        }
    }

    async fn step(
        &self,
        working: &mut ConversationState,
        call: &PlannedCall,
        ctx: &TurnContext<'_>,
        run: &mut TurnRun,
    ) -> Result<Step, TurnError> {
        let spec = match self.table.resolve_spec(&call.name) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(session_id = ctx.session_id, function = %call.name, "decision step asked for an unknown function");
                return Ok(Step::Continue {
                    result: json!({ "function": call.name, "ok": false, "error": e.to_string() }),
                    say: None,
                });
            }
        };
        let operation = spec.operation;

        if let Some(refusal) = self.capability_refusal(operation, ctx.tenant) {
            tracing::info!(session_id = ctx.session_id, function = %spec.name, "capability disabled for organization");
            return Ok(Step::Stop(refusal));
        }

        let changes_existing = matches!(
            operation,
            Operation::UpdateAppointment | Operation::CancelAppointment
        );
        if changes_existing && working.patient.id.is_none() {
            return Ok(Step::Clarify(reply::ask_for(&[
                "your name and phone number so I can find your appointment".to_string(),
            ])));
        }

        let rescheduling = operation == Operation::UpdateAppointment
            || (operation == Operation::FindSlots
                && working.pending_action == Some(PendingAction::Reschedule));
        if rescheduling && !working.appointment_intent.appointments_reviewed {
            return self.review_first(working, ctx, run).await;
        }

        if operation.commits_booking() && working.appointment_intent.selected_slot().is_none() {
            tracing::info!(session_id = ctx.session_id, function = %spec.name, "commit blocked: no confirmed slot");
            return Ok(Step::Clarify(self.pick_a_slot_prompt(working, ctx)));
        }

        self.run_spec(spec, &call.arguments, working, ctx, run).await
    }

    /// Reads the caller's appointments back to them before a new time is
    /// discussed.
    async fn review_first(
        &self,
        working: &mut ConversationState,
        ctx: &TurnContext<'_>,
        run: &mut TurnRun,
    ) -> Result<Step, TurnError> {
        if working.patient.id.is_none() {
            return Ok(Step::Clarify(reply::ask_for(&[
                "your name and phone number so I can find your appointments".to_string(),
            ])));
        }
        let spec = self.table.resolve_spec(REVIEW_FUNCTION).map_err(|_| {
            tracing::error!("dispatch table is missing {REVIEW_FUNCTION}");
            TurnError::Config(format!("dispatch table has no {REVIEW_FUNCTION} function"))
        })?;
        tracing::info!(session_id = ctx.session_id, "reviewing existing appointments before reschedule");

        match self.run_spec(spec, &Map::new(), working, ctx, run).await? {
            Step::Continue { result, say } => {
                let upcoming = result["result"]["upcoming"].as_array().map_or(0, |a| a.len());
                run.results.push(result);
                let mut message = say.unwrap_or_default();
                if upcoming > 0 {
                    let question = if upcoming == 1 {
                        " What day would you like to move it to?"
                    } else {
                        " Which one would you like to move, and what day works for you?"
                    };
                    message.push_str(question);
                }
                Ok(Step::Stop(message.trim().to_string()))
            }
            other => Ok(other),
        }
    }

    async fn run_spec(
        &self,
        spec: &FunctionSpec,
        arguments: &Map<String, Value>,
        working: &mut ConversationState,
        ctx: &TurnContext<'_>,
        run: &mut TurnRun,
    ) -> Result<Step, TurnError> {
        self.enter(ctx, TurnPhase::Resolving);
        let resolver = ParameterResolver::new(self.llm, self.backend);
        let recent = tail(ctx.history, self.settings.extraction_turns);
        let resolved = match resolver
            .resolve(ctx.organization_id, spec, arguments, working, recent, ctx.now.date())
            .await
        {
            Ok(resolved) => resolved,
            Err(ResolveError::MissingRequired(names)) => {
                tracing::info!(session_id = ctx.session_id, function = %spec.name, missing = ?names, "clarifying");
                let labels: Vec<String> = names
                    .iter()
                    .filter_map(|n| spec.param(n))
                    .map(|p| p.label())
                    .collect();
                return Ok(Step::Clarify(reply::ask_for(&labels)));
            }
            Err(ResolveError::Backend(e)) => {
                return Ok(self.failure_step(spec, e, working, ctx).await);
            }
        };

        if resolved.operation.commits_booking() && !self.matches_selection(&resolved, working) {
            tracing::warn!(session_id = ctx.session_id, function = %spec.name, "commit blocked: arguments differ from the confirmed slot");
            return Ok(Step::Clarify(self.pick_a_slot_prompt(working, ctx)));
        }

        self.enter(ctx, TurnPhase::Executing);
        match self.execute_with_retry(&resolved, working, ctx, run).await {
            Ok(executed) => {
                self.enter(ctx, TurnPhase::StateUpdate);
                Ok(self.fold(&resolved, executed, working, ctx, run))
            }
            Err(e) => Ok(self.failure_step(spec, e, working, ctx).await),
        }
    }

    /// A commit must book exactly the slot the caller affirmed.
    fn matches_selection(&self, call: &ResolvedCall, working: &ConversationState) -> bool {
        let Some(selected) = working.appointment_intent.selected_slot() else {
            return false;
        };
        let start = call
            .arg_str("start_time")
            .and_then(crate::models::function::parse_datetime);
        let duration = call.arguments.get("duration_minutes").and_then(Value::as_i64);
        start == Some(selected.start)
            && call.arg_str("provider_id") == Some(selected.provider_id.as_str())
            && call.arg_str("operatory_id") == Some(selected.operatory_id.as_str())
            && duration == Some(selected.duration_minutes)
    }

    async fn execute_with_retry(
        &self,
        call: &ResolvedCall,
        working: &ConversationState,
        ctx: &TurnContext<'_>,
        run: &mut TurnRun,
    ) -> Result<Executed, BookingError> {
        loop {
            let result = match tokio::time::timeout(
                self.settings.backend_timeout,
                self.execute(call, working, ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BookingError::Transient(format!("{} timed out", call.function))),
            };

            match result {
                Err(e) if e.is_transient() && !run.retry_used => {
                    run.retry_used = true;
                    tracing::warn!(session_id = ctx.session_id, function = %call.function, error = %e, "retrying backend call once");
                }
                other => return other,
            }
        }
    }

    async fn execute(
        &self,
        call: &ResolvedCall,
        working: &ConversationState,
        ctx: &TurnContext<'_>,
    ) -> Result<Executed, BookingError> {
        let org = ctx.organization_id;
        let backend = self.backend;

        match call.operation {
            Operation::SearchPatients => {
                let query: PatientQuery = call.parse_args().map_err(invalid_args)?;
                Ok(Executed::Patients(backend.search_patients(org, &query).await?))
            }
            Operation::FindOrCreatePatient => {
                let patient: NewPatient = call.parse_args().map_err(invalid_args)?;
                let existing = backend
                    .search_patients(
                        org,
                        &PatientQuery {
                            phone: Some(patient.phone.clone()),
                            last_name: Some(patient.last_name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                match existing.into_iter().next() {
                    Some(found) => Ok(Executed::Identified(found)),
                    None => Ok(Executed::Identified(backend.create_patient(org, &patient).await?)),
                }
            }
            Operation::CreatePatient => {
                let patient: NewPatient = call.parse_args().map_err(invalid_args)?;
                Ok(Executed::Identified(backend.create_patient(org, &patient).await?))
            }
            Operation::UpdatePatient => {
                let changes: PatientChanges = call.parse_args().map_err(invalid_args)?;
                ensure_own_record(&changes.patient_id, working)?;
                Ok(Executed::PatientUpdated(backend.update_patient(org, &changes).await?))
            }
            Operation::SearchAppointments => {
                let query: AppointmentQuery = call.parse_args().map_err(invalid_args)?;
                if let Some(patient_id) = &query.patient_id {
                    ensure_own_record(patient_id, working)?;
                }
                let appointments = backend.search_appointments(org, &query).await?;
                Ok(Executed::Appointments {
                    appointments,
                    patient_id: query.patient_id,
                })
            }
            Operation::FindSlots => {
                let args: SlotSearchArgs = call.parse_args().map_err(invalid_args)?;
                let query = args.into_query(ctx.now);
                let slots = availability::find_slots(backend, org, &query)
                    .await
                    .map_err(planner_failure)?;
                Ok(Executed::Slots { query, slots })
            }
            Operation::CheckSlot => {
                let args: SlotCheckArgs = call.parse_args().map_err(invalid_args)?;
                let candidate = availability::evaluate_slot(backend, org, &args)
                    .await
                    .map_err(planner_failure)?;
                Ok(Executed::SlotCheck(candidate))
            }
            Operation::CreateAppointment => {
                let appointment: NewAppointment = call.parse_args().map_err(invalid_args)?;
                if availability::has_conflict(
                    backend,
                    org,
                    &appointment.provider_id,
                    &appointment.operatory_id,
                    appointment.start_time,
                    appointment.duration_minutes,
                )
                .await?
                {
                    return Err(BookingError::Conflict("slot taken before commit".to_string()));
                }
                Ok(Executed::Booked(backend.create_appointment(org, &appointment).await?))
            }
            Operation::UpdateAppointment => {
                let changes: AppointmentChanges = call.parse_args().map_err(invalid_args)?;
                let existing = self.owned_appointment(org, &changes.appointment_id, working).await?;
                let duration = changes.duration_minutes.unwrap_or(existing.duration_minutes);
                if backend
                    .has_conflict(
                        org,
                        &changes.provider_id,
                        &changes.operatory_id,
                        changes.start_time,
                        duration,
                        Some(existing.id.as_str()),
                    )
                    .await?
                {
                    return Err(BookingError::Conflict("slot taken before commit".to_string()));
                }
                Ok(Executed::Rescheduled(backend.update_appointment(org, &changes).await?))
            }
            Operation::CancelAppointment => {
                let args: CancelArgs = call.parse_args().map_err(invalid_args)?;
                self.owned_appointment(org, &args.appointment_id, working).await?;
                Ok(Executed::Cancelled(
                    backend
                        .cancel_appointment(org, &args.appointment_id, args.reason.as_deref())
                        .await?,
                ))
            }
            Operation::ListProviders => Ok(Executed::Providers(backend.list_providers(org).await?)),
            Operation::ListOperatories => {
                Ok(Executed::Operatories(backend.list_operatories(org).await?))
            }
            Operation::ListSchedules => {
                let provider_id = call.arg_str("provider_id");
                Ok(Executed::Schedules(backend.list_schedules(org, provider_id).await?))
            }
        }
    }

    /// The appointment, provided it belongs to the identified caller.
    async fn owned_appointment(
        &self,
        org: &str,
        appointment_id: &str,
        working: &ConversationState,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.backend.get_appointment(org, appointment_id).await?;
        match &working.patient.id {
            Some(patient_id) if *patient_id == appointment.patient_id => Ok(appointment),
            _ => Err(BookingError::NotFound(format!("appointment {appointment_id}"))),
        }
    }

    async fn failure_step(
        &self,
        spec: &FunctionSpec,
        error: BookingError,
        working: &mut ConversationState,
        ctx: &TurnContext<'_>,
    ) -> Step {
        let operation = spec.operation;
        match error {
            BookingError::Transient(msg) => {
                tracing::error!(session_id = ctx.session_id, function = %spec.name, error = %msg, "backend call failed after retry");
                Step::Failed(TRY_AGAIN_REPLY.to_string())
            }
            BookingError::NotFound(what) => {
                tracing::info!(session_id = ctx.session_id, function = %spec.name, missing = %what, "not found");
                Step::Stop(not_found_reply(operation, &what))
            }
            BookingError::Conflict(msg) if operation.commits_booking() => {
                tracing::warn!(session_id = ctx.session_id, function = %spec.name, reason = %msg, "slot taken at commit, re-offering");
                self.reoffer(working, ctx).await
            }
            BookingError::Conflict(_) => Step::Stop(
                "That time is no longer available. Would you like me to look for another one?"
                    .to_string(),
            ),
            BookingError::ValidationFailed(msg) => {
                tracing::info!(session_id = ctx.session_id, function = %spec.name, error = %msg, "validation failed");
                Step::Stop(format!(
                    "I wasn't able to do that ({msg}). Could you check the details for me?"
                ))
            }
        }
    }

    /// Fresh availability from the last search, offered again.
    async fn reoffer(&self, working: &mut ConversationState, ctx: &TurnContext<'_>) -> Step {
        const TAKEN: &str = "Sorry, that time was just taken.";

        let Some(mut query) = working.appointment_intent.last_slot_query.clone() else {
            working.appointment_intent.offer_slots(Vec::new());
            return Step::Stop(format!("{TAKEN} What other day or time would work for you?"));
        };
        query.not_before = Some(ctx.now);

        let search = tokio::time::timeout(
            self.settings.backend_timeout,
            availability::find_slots(self.backend, ctx.organization_id, &query),
        )
        .await;

        match search {
            Ok(Ok(slots)) => {
                let offers = choose_offers(slots, self.settings.max_offered_slots);
                if offers.is_empty() {
                    working.appointment_intent.offer_slots(Vec::new());
                    Step::Stop(format!(
                        "{TAKEN} I don't have anything else open then. Would another day work?"
                    ))
                } else {
                    let text = reply::offer(&offers, ctx.transport);
                    working.appointment_intent.offer_slots(offers);
                    Step::Stop(format!("{TAKEN} {text}"))
                }
            }
            _ => {
                working.appointment_intent.offer_slots(Vec::new());
                Step::Stop(format!("{TAKEN} Would you like me to look for another time?"))
            }
        }
    }

    fn identify(&self, patient: &Patient, working: &mut ConversationState, say: String) -> Step {
        match working.apply(StateUpdate::patient_identified(patient)) {
            Ok(()) => Step::Continue {
                result: json!({ "ok": true, "result": { "patient_id": patient.id, "name": patient.full_name() } }),
                say: Some(say),
            },
            Err(conflict) => {
                tracing::warn!(error = %conflict, "lookup returned a different patient than the identified one");
                let current = working.patient.display_name().unwrap_or_else(|| "another patient".to_string());
                Step::Stop(format!(
                    "I already have this conversation under {current}. Is this for someone else?"
                ))
            }
        }
    }

    fn event(
        &self,
        kind: BookingEventKind,
        appointment: &Appointment,
        working: &ConversationState,
        ctx: &TurnContext<'_>,
    ) -> BookingEvent {
        BookingEvent {
            kind,
            organization_id: ctx.organization_id.to_string(),
            session_id: ctx.session_id.to_string(),
            appointment_id: appointment.id.clone(),
            patient_name: working.patient.display_name(),
            start_time: appointment.start_time,
            appointment_type: appointment.appointment_type.clone(),
        }
    }

    fn fold(
        &self,
        call: &ResolvedCall,
        executed: Executed,
        working: &mut ConversationState,
        ctx: &TurnContext<'_>,
        run: &mut TurnRun,
    ) -> Step {
        let transport = ctx.transport;
        let tag = |mut result: Value| {
            result["function"] = json!(call.function);
            result
        };

        match executed {
            Executed::Patients(patients) => match patients.as_slice() {
                [] => Step::Stop(not_found_reply(Operation::SearchPatients, "patient")),
                [one] => {
                    let say = format!("Thanks, {}, I found your record.", one.first_name);
                    match self.identify(one, working, say) {
                        Step::Continue { result, say } => Step::Continue { result: tag(result), say },
                        other => other,
                    }
                }
                _ => Step::Stop(
                    "I found more than one record matching that. Could you confirm your date of birth so I pick the right one?"
                        .to_string(),
                ),
            },
            Executed::Identified(patient) => {
                let say = format!("Thanks, {}.", patient.first_name);
                match self.identify(&patient, working, say) {
                    Step::Continue { result, say } => Step::Continue { result: tag(result), say },
                    other => other,
                }
            }
            Executed::PatientUpdated(patient) => {
                match self.identify(&patient, working, "I've updated your details.".to_string()) {
                    Step::Continue { result, say } => Step::Continue { result: tag(result), say },
                    other => other,
                }
            }
            Executed::Appointments {
                appointments,
                patient_id,
            } => {
                let upcoming: Vec<&Appointment> = appointments
                    .iter()
                    .filter(|a| a.is_active() && a.start_time >= ctx.now)
                    .collect();
                let for_caller = patient_id.is_some() && patient_id == working.patient.id;
                if for_caller {
                    let target = match upcoming.as_slice() {
                        [only] => Patch::Set(only.id.clone()),
                        _ => Patch::Keep,
                    };
                    let _ = working.apply(StateUpdate {
                        appointment_intent: IntentUpdate {
                            appointments_reviewed: Some(true),
                            target_appointment_id: target,
                            ..Default::default()
                        },
                        ..Default::default()
                    });
                }
                let say = if upcoming.is_empty() {
                    "I don't see any upcoming appointments.".to_string()
                } else if for_caller {
                    format!("You have {}.", reply::appointment_list(&upcoming, transport))
                } else {
                    format!("I found {}.", reply::appointment_list(&upcoming, transport))
                };
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": { "upcoming": upcoming } })),
                    say: Some(say),
                }
            }
            Executed::Slots { query, slots } => {
                let offers = choose_offers(slots, self.settings.max_offered_slots);
                let _ = working.apply(StateUpdate {
                    appointment_intent: IntentUpdate {
                        preferred_date: Patch::Set(query.range_start.date()),
                        last_slot_query: Patch::Set(query.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                });
                let say = if offers.is_empty() {
                    format!(
                        "I don't have any openings on {}. Would another day work?",
                        query.range_start.format("%A, %B %-d")
                    )
                } else {
                    reply::offer(&offers, transport)
                };
                let listed: Vec<Value> = offers
                    .iter()
                    .enumerate()
                    .map(|(i, s)| json!({ "option": i + 1, "start": s.start, "provider": s.provider_name }))
                    .collect();
                working.appointment_intent.offer_slots(offers);
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": { "offered": listed } })),
                    say: Some(say),
                }
            }
            Executed::SlotCheck(candidate) => {
                let when = reply::format_time(&candidate.start, transport);
                let say = if candidate.is_free() {
                    format!(
                        "{when} with {} is open. Would you like me to book it?",
                        candidate.provider_name
                    )
                } else {
                    format!("{when} isn't available. Would you like me to find other times?")
                };
                let result = tag(json!({ "ok": true, "result": candidate }));
                if candidate.is_free() {
                    working.appointment_intent.offer_slots(vec![candidate]);
                }
                Step::Continue {
                    result,
                    say: Some(say),
                }
            }
            Executed::Booked(appointment) => {
                run.committed = true;
                let provider = working
                    .appointment_intent
                    .selected_slot()
                    .map(|s| format!(" with {}", s.provider_name))
                    .unwrap_or_default();
                let what = appointment.appointment_type.as_deref().unwrap_or("visit");
                let say = format!(
                    "You're booked for a {what} on {}{provider}.",
                    reply::format_time(&appointment.start_time, transport)
                );
                run.events.push(self.event(BookingEventKind::Booked, &appointment, working, ctx));
                working.complete_booking();
                tracing::info!(session_id = ctx.session_id, appointment_id = %appointment.id, "booking committed");
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": appointment })),
                    say: Some(say),
                }
            }
            Executed::Rescheduled(appointment) => {
                run.committed = true;
                let say = format!(
                    "Your appointment has been moved to {}.",
                    reply::format_time(&appointment.start_time, transport)
                );
                run.events.push(self.event(BookingEventKind::Rescheduled, &appointment, working, ctx));
                working.complete_booking();
                tracing::info!(session_id = ctx.session_id, appointment_id = %appointment.id, "reschedule committed");
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": appointment })),
                    say: Some(say),
                }
            }
            Executed::Cancelled(appointment) => {
                run.committed = true;
                let what = appointment.appointment_type.as_deref().unwrap_or("appointment");
                let say = format!(
                    "Your {what} on {} has been cancelled.",
                    reply::format_time(&appointment.start_time, transport)
                );
                run.events.push(self.event(BookingEventKind::Cancelled, &appointment, working, ctx));
                working.complete_booking();
                tracing::info!(session_id = ctx.session_id, appointment_id = %appointment.id, "cancellation committed");
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": appointment })),
                    say: Some(say),
                }
            }
            Executed::Providers(providers) => {
                let names: Vec<String> = providers.iter().filter(|p| p.active).map(|p| p.name.clone()).collect();
                let say = if names.is_empty() {
                    "I don't have any providers listed right now.".to_string()
                } else {
                    format!("Our providers are {}.", reply::join_list(&names, "and"))
                };
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": providers })),
                    say: Some(say),
                }
            }
            Executed::Operatories(operatories) => {
                let active = operatories.iter().filter(|o| o.active).count();
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": operatories })),
                    say: Some(format!("We have {active} treatment rooms.")),
                }
            }
            Executed::Schedules(blocks) => {
                let say = if blocks.is_empty() {
                    "I don't have working hours on file for that.".to_string()
                } else {
                    format!("The working hours are {}.", describe_hours(&blocks))
                };
                Step::Continue {
                    result: tag(json!({ "ok": true, "result": blocks })),
                    say: Some(say),
                }
            }
        }
    }
}

fn not_found_reply(operation: Operation, what: &str) -> String {
    match operation {
        op if op.identifies_patient()
            || matches!(op, Operation::UpdatePatient | Operation::SearchAppointments) =>
        {
            "I couldn't find a patient record with those details. Could you give me your name or phone number again, or would you like me to set you up as a new patient?"
                .to_string()
        }
        Operation::UpdateAppointment | Operation::CancelAppointment => {
            "I couldn't find that appointment under your record. Which appointment do you mean?"
                .to_string()
        }
        _ => format!("I couldn't find {what} at our practice. Could you check that for me?"),
    }
}
