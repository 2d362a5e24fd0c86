use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use tower::ServiceExt;

use frontdesk::config::{AppConfig, OrchestratorSettings};
use frontdesk::db::{self, queries};
use frontdesk::handlers;
use frontdesk::models::practice::parse_weekday;
use frontdesk::models::{AppointmentQuery, Operatory, Provider, ScheduleBlock, SlotQuery, TransportProfile};
use frontdesk::services::ai::{LlmProvider, Message};
use frontdesk::services::availability::find_slots;
use frontdesk::services::backend::{BookingOperations, SqliteBackend};
use frontdesk::services::conversation::{FrontDesk, TurnRequest};
use frontdesk::services::dispatch::{DispatchTable, DEFAULT_FUNCTIONS};
use frontdesk::services::messaging::MessagingProvider;
use frontdesk::services::notifications::{BookingEventKind, Notifier};
use frontdesk::services::tenant_config::TenantConfigCache;
use frontdesk::state::AppState;

const ORG: &str = "org-1";

// ── Mock Providers ──

/// Answers the decision step by matching the caller's latest message
/// against scripted rules. Extraction prompts get an empty object.
struct MockLlm {
    rules: Vec<(&'static str, Value)>,
    calls: Mutex<usize>,
}

impl MockLlm {
    fn new(rules: Vec<(&'static str, Value)>) -> Self {
        Self {
            rules,
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn chat(&self, system_prompt: &str, messages: &[Message]) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        if system_prompt.starts_with("Extract the following fields") {
            return Ok("{}".to_string());
        }

        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let plan = self
            .rules
            .iter()
            .find(|(needle, _)| last.contains(needle))
            .map(|(_, plan)| plan.clone())
            .unwrap_or_else(|| json!({ "calls": [], "reply": "How can I help you with your appointment today?" }));
        Ok(plan.to_string())
    }
}

struct MockMessaging {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Helpers ──

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

/// Monday morning before the office opens.
fn now() -> NaiveDateTime {
    dt("2030-01-07 08:00")
}

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        llm_provider: "openai".to_string(),
        llm_api_key: String::new(),
        llm_base_url: String::new(),
        llm_model: String::new(),
        ollama_url: "http://localhost:11434".to_string(),
        ollama_model: "llama3.2".to_string(),
        twilio_account_sid: String::new(),
        twilio_auth_token: String::new(), // empty = skip signature validation
        twilio_phone_number: "+15551234567".to_string(),
        functions_path: None,
        orchestrator: OrchestratorSettings::default(),
        session_ttl_minutes: 30,
    }
}

/// Two providers working weekday mornings, two chairs.
fn seeded_backend() -> Arc<SqliteBackend> {
    let conn = db::init_db(":memory:").unwrap();
    queries::insert_organization(
        &conn,
        ORG,
        "Bright Smiles",
        Some(r#"{"practice":{"owner_phone":"+15559999999"}}"#),
    )
    .unwrap();
    queries::insert_organization(
        &conn,
        "org-2",
        "Other Practice",
        Some(r#"{"practice":{"owner_phone":"+15558888888"}}"#),
    )
    .unwrap();
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
    Arc::new(SqliteBackend::new(Arc::new(Mutex::new(conn))))
}

struct TestApp {
    state: Arc<AppState>,
    backend: Arc<SqliteBackend>,
    llm: Arc<MockLlm>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

fn test_app(rules: Vec<(&'static str, Value)>) -> TestApp {
    test_app_with(test_config(), rules)
}

fn test_app_with(config: AppConfig, rules: Vec<(&'static str, Value)>) -> TestApp {
    let backend = seeded_backend();
    let llm = Arc::new(MockLlm::new(rules));
    let sent = Arc::new(Mutex::new(vec![]));
    let messaging = MockMessaging {
        sent: Arc::clone(&sent),
    };

    let desk = FrontDesk::new(
        llm.clone(),
        backend.clone(),
        DispatchTable::from_json(DEFAULT_FUNCTIONS).unwrap(),
        config.orchestrator.clone(),
        TenantConfigCache::new(backend.clone()),
        Notifier::new(Arc::new(messaging)),
    )
    .with_clock(Arc::new(now));

    let state = Arc::new(AppState {
        config,
        desk,
        backend: backend.clone(),
    });
    TestApp {
        state,
        backend,
        llm,
        sent,
    }
}

fn turn(session: &str, utterance: &str) -> TurnRequest {
    TurnRequest {
        session_id: session.to_string(),
        organization_id: ORG.to_string(),
        utterance: utterance.to_string(),
        history: None,
        transport: TransportProfile::web_chat(),
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn booking_plan(first: &str, last: &str, phone: &str) -> Value {
    json!({
        "facts": {
            "first_name": first, "last_name": last, "phone": phone,
            "appointment_type": "cleaning", "preferred_date": "2030-01-08",
            "time_of_day": "morning", "pending_action": "create"
        },
        "calls": [
            {"name": "FindOrCreatePatient", "arguments": {}},
            {"name": "FindAvailableSlots", "arguments": {}}
        ],
        "needs_results": false
    })
}

fn commit_plan() -> Value {
    json!({
        "calls": [{"name": "CreateAppointment", "arguments": {}}],
        "reply": "Let me book that for you."
    })
}

// ── Conversation scenarios ──

#[tokio::test]
async fn test_book_cleaning_end_to_end() {
    let app = test_app(vec![
        ("Jane Doe", booking_plan("Jane", "Doe", "555-0100")),
        ("9:30", commit_plan()),
    ]);
    let desk = &app.state.desk;
    let mut events = desk.notifier().subscribe();

    let first = desk
        .handle_turn(turn(
            "chat-1",
            "I'd like to book a cleaning for Jane Doe, phone 555-0100, tomorrow morning",
        ))
        .await
        .unwrap();
    assert!(first.handed_off);
    assert!(first.reply.contains("9:30 AM"), "{}", first.reply);

    let state = desk.sessions().get("chat-1").await;
    assert!(state.patient.id.is_some());
    assert_eq!(state.patient.phone.as_deref(), Some("5550100"));
    let offered = state.appointment_intent.offered_slots();
    assert!((2..=4).contains(&offered.len()));
    assert!(offered.iter().all(|s| s.start.date() == NaiveDate::from_ymd_opt(2030, 1, 8).unwrap()));
    assert!(offered.iter().all(|s| s.start.time() < NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    assert!(state.appointment_intent.selected_slot().is_none());

    let second = desk.handle_turn(turn("chat-1", "the 9:30 one")).await.unwrap();
    assert!(second.reply.contains("You're booked"), "{}", second.reply);
    assert!(second.reply.contains("9:30 AM"));

    let booked = app
        .backend
        .search_appointments(ORG, &AppointmentQuery::default())
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].start_time, dt("2030-01-08 09:30"));
    assert_eq!(booked[0].appointment_type.as_deref(), Some("cleaning"));

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, BookingEventKind::Booked);
    assert_eq!(event.patient_name.as_deref(), Some("Jane Doe"));

    // booking workflow cleared, caller still known
    let state = desk.sessions().get("chat-1").await;
    assert!(state.appointment_intent.offered_slots().is_empty());
    assert!(state.patient.id.is_some());

    // owner text is fire-and-forget and goes only to this practice's owner
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let sent = app.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15559999999");
    assert!(sent[0].1.contains("Jane Doe"));
}

#[tokio::test]
async fn test_option_number_picks_offered_slot() {
    let app = test_app(vec![
        ("Jane Doe", booking_plan("Jane", "Doe", "555-0100")),
        ("2", commit_plan()),
    ]);
    let desk = &app.state.desk;
    desk.handle_turn(turn("chat-1", "book a cleaning for Jane Doe, 555-0100"))
        .await
        .unwrap();

    let reply = desk.handle_turn(turn("chat-1", "2")).await.unwrap();
    assert!(reply.handed_off);
    assert!(reply.reply.contains("You're booked"), "{}", reply.reply);

    let booked = app
        .backend
        .search_appointments(ORG, &AppointmentQuery::default())
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].start_time, dt("2030-01-08 09:30"));
}

#[tokio::test]
async fn test_non_ascii_utterance_is_handled() {
    let app = test_app(vec![]);
    let reply = app
        .state
        .desk
        .handle_turn(turn("chat-1", "Book İ for Éamon"))
        .await
        .unwrap();
    assert!(reply.handed_off);
}

#[tokio::test]
async fn test_booked_slot_leaves_availability() {
    let app = test_app(vec![
        ("Jane Doe", booking_plan("Jane", "Doe", "555-0100")),
        ("9:30", commit_plan()),
    ]);
    let desk = &app.state.desk;
    desk.handle_turn(turn("chat-1", "book a cleaning for Jane Doe, 555-0100"))
        .await
        .unwrap();
    desk.handle_turn(turn("chat-1", "the 9:30 one")).await.unwrap();

    let query = SlotQuery {
        range_start: dt("2030-01-08 00:00"),
        range_end: dt("2030-01-09 00:00"),
        provider_id: Some("prov-a".to_string()),
        operatory_id: None,
        duration_minutes: 30,
        time_of_day: None,
        not_before: None,
    };
    let slots = find_slots(app.backend.as_ref(), ORG, &query).await.unwrap();
    let (start, end) = (dt("2030-01-08 09:30"), dt("2030-01-08 10:00"));
    assert!(!slots.is_empty());
    assert!(!slots.iter().any(|s| s.start < end && s.end() > start));
}

#[tokio::test]
async fn test_fully_booked_day_has_no_slots() {
    let app = test_app(vec![]);
    let patient = app
        .backend
        .create_patient(
            ORG,
            &frontdesk::models::NewPatient {
                first_name: "Jane".to_string(),
                last_name: "Doe".to_string(),
                phone: "5550100".to_string(),
                email: None,
                date_of_birth: None,
            },
        )
        .await
        .unwrap();
    let mut start = dt("2030-01-08 09:00");
    while start < dt("2030-01-08 12:00") {
        app.backend
            .create_appointment(
                ORG,
                &frontdesk::models::NewAppointment {
                    patient_id: patient.id.clone(),
                    provider_id: "prov-a".to_string(),
                    operatory_id: "op-1".to_string(),
                    start_time: start,
                    duration_minutes: 30,
                    appointment_type: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        start += chrono::Duration::minutes(30);
    }

    let query = SlotQuery {
        range_start: dt("2030-01-08 00:00"),
        range_end: dt("2030-01-09 00:00"),
        provider_id: Some("prov-a".to_string()),
        operatory_id: None,
        duration_minutes: 30,
        time_of_day: None,
        not_before: None,
    };
    let slots = find_slots(app.backend.as_ref(), ORG, &query).await.unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn test_hours_question_answered_without_orchestrator() {
    let app = test_app(vec![]);
    let router = handlers::router(app.state.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/sessions/web-1/turns",
            json!({ "organization_id": ORG, "utterance": "what are your hours" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["handed_off"], false);
    assert_eq!(app.llm.call_count(), 0);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/sessions/web-1/state")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reschedule_requires_identification() {
    let app = test_app(vec![
        (
            "reschedule",
            json!({
                "facts": {"pending_action": "reschedule"},
                "calls": [{"name": "GetPatientAppointments", "arguments": {}}]
            }),
        ),
        (
            "John Smith",
            json!({
                "facts": {"first_name": "John", "last_name": "Smith", "phone": "555-0142"},
                "calls": [
                    {"name": "SearchPatients", "arguments": {}},
                    {"name": "UpdateAppointment", "arguments": {"appointment_id": "appt-1"}}
                ]
            }),
        ),
    ]);
    let desk = &app.state.desk;

    let first = desk
        .handle_turn(turn("call-1", "I need to reschedule my appointment"))
        .await
        .unwrap();
    assert!(first.reply.contains("your name or phone number"), "{}", first.reply);

    let second = desk
        .handle_turn(turn("call-1", "It's John Smith, 555-0142"))
        .await
        .unwrap();
    assert!(second.reply.contains("couldn't find a patient record"), "{}", second.reply);
    assert!(second.reply.contains("name or phone number"));

    let state = desk.sessions().get("call-1").await;
    assert!(state.patient.id.is_none());
    assert!(!state.appointment_intent.appointments_reviewed);
    let appointments = app
        .backend
        .search_appointments(ORG, &AppointmentQuery::default())
        .await
        .unwrap();
    assert!(appointments.is_empty());
}

#[tokio::test]
async fn test_racing_sessions_book_one_slot_once() {
    let app = test_app(vec![
        ("Ann Lee", booking_plan("Ann", "Lee", "555-0101")),
        ("Bob Ray", booking_plan("Bob", "Ray", "555-0102")),
        ("9:00", commit_plan()),
    ]);
    let desk = &app.state.desk;

    desk.handle_turn(turn("s-ann", "book a cleaning for Ann Lee")).await.unwrap();
    desk.handle_turn(turn("s-bob", "book a cleaning for Bob Ray")).await.unwrap();

    let (a, b) = tokio::join!(
        desk.handle_turn(turn("s-ann", "the 9:00 one")),
        desk.handle_turn(turn("s-bob", "the 9:00 one")),
    );
    let replies = [a.unwrap().reply, b.unwrap().reply];
    let booked = replies.iter().filter(|r| r.contains("You're booked")).count();
    let reoffered = replies.iter().filter(|r| r.contains("just taken")).count();
    assert_eq!((booked, reoffered), (1, 1), "{replies:?}");

    let at_nine: Vec<_> = app
        .backend
        .search_appointments(ORG, &AppointmentQuery::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.start_time == dt("2030-01-08 09:00") && a.provider_id == "prov-a")
        .collect();
    assert_eq!(at_nine.len(), 1);

    // the loser was re-offered fresh options, none of them the taken one
    let loser = if replies[0].contains("just taken") { "s-ann" } else { "s-bob" };
    let state = desk.sessions().get(loser).await;
    assert!(!state.appointment_intent.offered_slots().is_empty());
    assert!(state.appointment_intent.selected_slot().is_none());
    assert!(!state
        .appointment_intent
        .offered_slots()
        .iter()
        .any(|s| s.start == dt("2030-01-08 09:00") && s.provider_id == "prov-a"));
}

// ── HTTP surface ──

#[tokio::test]
async fn test_health() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_function_list() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(Request::builder().uri("/api/functions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert!(names.contains(&"CreateAppointment"));
    assert!(names.contains(&"FindAvailableSlots"));
}

#[tokio::test]
async fn test_turn_requires_organization() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(post_json(
            "/api/sessions/web-1/turns",
            json!({ "organization_id": " ", "utterance": "book a cleaning" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_organization_mismatch() {
    let app = test_app(vec![]);
    let router = handlers::router(app.state.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/sessions/web-1/turns",
            json!({ "organization_id": ORG, "utterance": "book a cleaning" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post_json(
            "/api/sessions/web-1/turns",
            json!({ "organization_id": "org-2", "utterance": "book a cleaning" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_session_state_requires_auth_and_end_discards() {
    let app = test_app(vec![(
        "Jane",
        json!({ "facts": {"first_name": "Jane"}, "calls": [], "reply": "Thanks Jane, what day works?" }),
    )]);
    let router = handlers::router(app.state.clone());

    router
        .clone()
        .oneshot(post_json(
            "/api/sessions/web-1/turns",
            json!({ "organization_id": ORG, "utterance": "book a cleaning for Jane" }),
        ))
        .await
        .unwrap();

    let unauthorized = router
        .clone()
        .oneshot(Request::builder().uri("/api/sessions/web-1/state").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/sessions/web-1/state")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["patient"]["first_name"], "Jane");

    let ended = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/web-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ended.status(), StatusCode::NO_CONTENT);
    assert!(!app.state.desk.sessions().contains("web-1"));

    let again = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/web-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tenant_config_update_takes_effect() {
    let app = test_app(vec![]);
    let router = handlers::router(app.state.clone());

    // warm the cache with the defaults
    app.state.desk.tenants().get(ORG).await;

    let config = json!({
        "identity": {"practice_name": "Bright Smiles"},
        "practice": {"business_hours": "Mon-Thu 8am-4pm", "phone": "555-0199"}
    });
    let unauthorized = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/admin/organizations/{ORG}/config"))
                .header("Content-Type", "application/json")
                .body(Body::from(config.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/admin/organizations/{ORG}/config"))
                .header("Content-Type", "application/json")
                .header("Authorization", "Bearer test-token")
                .body(Body::from(config.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(post_json(
            "/api/sessions/web-2/turns",
            json!({ "organization_id": ORG, "utterance": "what are your hours?" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["reply"].as_str().unwrap().contains("Mon-Thu 8am-4pm"), "{body}");
}

#[tokio::test]
async fn test_tenant_config_unknown_organization() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/admin/organizations/nope/config")
                .header("Content-Type", "application/json")
                .header("Authorization", "Bearer test-token")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_stream_requires_token() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/events?token=wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sms_webhook_replies_with_twiml() {
    let app = test_app(vec![]);
    let response = handlers::router(app.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhook/sms/{ORG}"))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(
                    "From=%2B15550001111&To=%2B15551234567&Body=where+are+you+located&MessageSid=SM1",
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/xml");
    let body = body_text(response).await;
    assert!(body.starts_with("<Response><Message>"), "{body}");
}

#[tokio::test]
async fn test_sms_webhook_rejects_bad_signature() {
    let mut config = test_config();
    config.twilio_auth_token = "secret".to_string();
    let app = test_app_with(config, vec![]);

    let response = handlers::router(app.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhook/sms/{ORG}"))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .header("X-Twilio-Signature", "bogus")
                .body(Body::from("From=%2B15550001111&To=%2B15551234567&Body=hi"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.llm.call_count(), 0);
}
