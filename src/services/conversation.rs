use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorSettings;
use crate::errors::TurnError;
use crate::models::{TransportProfile, TurnMessage};
use crate::services::ai::LlmProvider;
use crate::services::backend::BookingOperations;
use crate::services::dispatch::DispatchTable;
use crate::services::greeting::{GreetingAgent, GreetingOutcome};
use crate::services::notifications::Notifier;
use crate::services::orchestrator::{Orchestrator, TurnContext, TurnPhase};
use crate::services::session_store::SessionStore;
use crate::services::tenant_config::TenantConfigCache;

/// Source of "now" for date resolution and slot filtering.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// One utterance handed over by a transport.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub organization_id: String,
    pub utterance: String,
    /// Prior turns as the transport saw them. When absent the session's own
    /// transcript is used.
    #[serde(default)]
    pub history: Option<Vec<TurnMessage>>,
    #[serde(default)]
    pub transport: TransportProfile,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnReply {
    pub reply: String,
    /// Whether the orchestrator ran for this turn.
    pub handed_off: bool,
    pub phase: TurnPhase,
    pub escalated: bool,
}

/// Entry point for every transport: greeting agent first, then the
/// orchestrator for the session.
pub struct FrontDesk {
    llm: Arc<dyn LlmProvider>,
    backend: Arc<dyn BookingOperations>,
    table: DispatchTable,
    settings: OrchestratorSettings,
    sessions: SessionStore,
    tenants: TenantConfigCache,
    notifier: Notifier,
    clock: Clock,
}

impl FrontDesk {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        backend: Arc<dyn BookingOperations>,
        table: DispatchTable,
        settings: OrchestratorSettings,
        tenants: TenantConfigCache,
        notifier: Notifier,
    ) -> Self {
        Self {
            llm,
            backend,
            table,
            settings,
            sessions: SessionStore::new(),
            tenants,
            notifier,
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tenants(&self) -> &TenantConfigCache {
        &self.tenants
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, TurnError> {
        let tenant = self.tenants.get(&request.organization_id).await;
        let greeting = GreetingAgent::new(&tenant, &request.transport);

        // A stateless question on a fresh session never creates one.
        if !self.sessions.contains(&request.session_id) {
            if let GreetingOutcome::DirectReply(reply) = greeting.handle(&request.utterance, true) {
                tracing::info!(
                    session_id = %request.session_id,
                    organization_id = %request.organization_id,
                    "answered by front agent"
                );
                return Ok(TurnReply {
                    reply,
                    handed_off: false,
                    phase: TurnPhase::Idle,
                    escalated: false,
                });
            }
        }

        let handle = self
            .sessions
            .handle(&request.session_id, &request.organization_id)
            .await?;
        let mut session = handle.lock().await;

        let is_first_turn = session.transcript.is_empty();
        let greeting = greeting
            .choosing_from_offers(!session.state.appointment_intent.offered_slots().is_empty());
        let summary = match greeting.handle(&request.utterance, is_first_turn) {
            GreetingOutcome::DirectReply(reply) => {
                session.transcript.push(TurnMessage::user(&request.utterance));
                session.transcript.push(TurnMessage::assistant(&reply));
                session.touch();
                return Ok(TurnReply {
                    reply,
                    handed_off: false,
                    phase: TurnPhase::Idle,
                    escalated: false,
                });
            }
            GreetingOutcome::Handoff(summary) => summary,
        };

        tracing::info!(
            session_id = %request.session_id,
            organization_id = %request.organization_id,
            intent = ?summary.intent,
            "handing turn to orchestrator"
        );

        let mut history = request
            .history
            .clone()
            .unwrap_or_else(|| session.transcript.clone());
        history.push(TurnMessage::user(&request.utterance));

        let ctx = TurnContext {
            session_id: &request.session_id,
            organization_id: &request.organization_id,
            tenant: &tenant,
            transport: &request.transport,
            history: &history,
            utterance: &request.utterance,
            handoff: Some(&summary),
            now: (self.clock)(),
        };
        let orchestrator = Orchestrator::new(
            self.llm.as_ref(),
            self.backend.as_ref(),
            &self.table,
            &self.settings,
        );
        let outcome = orchestrator.run_turn(&mut session.state, &ctx).await?;

        session.transcript.push(TurnMessage::user(&request.utterance));
        session.transcript.push(TurnMessage::assistant(&outcome.reply));
        session.touch();
        drop(session);

        for event in outcome.events {
            self.notifier.publish(event, &tenant.practice.owner_phone);
        }

        Ok(TurnReply {
            reply: outcome.reply,
            handed_off: true,
            phase: outcome.phase,
            escalated: outcome.escalated,
        })
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.end(session_id)
    }
}
