use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::models::{
    ConversationState, IntentUpdate, Patch, PatientUpdate, PendingAction, StateUpdate,
    TenantConfig, TimeOfDay, TransportProfile, TurnMessage,
};
use crate::services::ai::{parse_json_reply, LlmProvider, Message};

const SYSTEM_PROMPT: &str = r#"You are the decision step of a dental practice's front desk assistant. Read the conversation and decide what to do next.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{
  "facts": {
    "first_name": "caller's first name or null",
    "last_name": "caller's last name or null",
    "phone": "caller's phone number or null",
    "date_of_birth": "YYYY-MM-DD or null",
    "appointment_type": "cleaning, checkup, filling, ... or null",
    "preferred_date": "YYYY-MM-DD or null",
    "preferred_time": "HH:MM or null",
    "time_of_day": "morning|afternoon|evening or null",
    "pending_action": "create|reschedule|cancel or null",
    "different_patient": false
  },
  "calls": [{"name": "FunctionName", "arguments": {"param": "value"}}],
  "reply": "what to say to the caller, or null",
  "needs_results": false
}

Rules:
- Record only facts the caller actually stated. Use null for anything not said. Resolve relative dates ("tomorrow", "next Tuesday") against today's date.
- Set different_patient to true only when the caller says the appointment is for someone other than the person already identified.
- Call only functions from the list below. Calls run in the order given and the results of earlier calls fill identifiers for later ones, so leave out arguments you do not know. Never invent ids.
- Never choose an appointment time for the caller. Use FindAvailableSlots to offer times and let the caller pick one; the system records their choice.
- Never say an appointment is booked, moved or cancelled unless a function result shows it succeeded.
- To reschedule or cancel, first identify the caller and look up their existing appointments.
- Set needs_results to true when you must see the results of your calls before replying."#;

/// Facts the model heard the caller state this turn, as raw strings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatedFacts {
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_of_birth: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub appointment_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub preferred_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub preferred_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time_of_day: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pending_action: Option<String>,
    #[serde(default)]
    pub different_patient: bool,
}

/// Accepts strings, numbers and null; blank strings and "null" count as absent.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl StatedFacts {
    /// Converts to a state update. Unparseable values are dropped rather
    /// than stored. A patient id is never taken from the model.
    pub fn to_update(&self) -> StateUpdate {
        let date = |s: &Option<String>| {
            s.as_deref()
                .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
        };

        StateUpdate {
            reidentify: self.different_patient,
            patient: PatientUpdate {
                id: Patch::Keep,
                first_name: self.first_name.clone().into(),
                last_name: self.last_name.clone().into(),
                phone: self
                    .phone
                    .as_deref()
                    .and_then(crate::models::normalize_phone)
                    .into(),
                date_of_birth: date(&self.date_of_birth).into(),
            },
            appointment_intent: IntentUpdate {
                appointment_type: self.appointment_type.clone().into(),
                preferred_date: date(&self.preferred_date).into(),
                preferred_time: self
                    .preferred_time
                    .as_deref()
                    .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
                    .into(),
                time_of_day: self.time_of_day.as_deref().and_then(TimeOfDay::parse).into(),
                ..Default::default()
            },
            pending_action: self
                .pending_action
                .as_deref()
                .and_then(PendingAction::parse)
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlannedCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// One decision: what the caller told us, what to call, what to say.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub facts: StatedFacts,
    #[serde(default)]
    pub calls: Vec<PlannedCall>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reply: Option<String>,
    #[serde(default)]
    pub needs_results: bool,
}

pub struct PlanningContext<'a> {
    pub tenant: &'a TenantConfig,
    pub transport: &'a TransportProfile,
    pub capabilities: &'a [Value],
    pub state: &'a ConversationState,
    pub now: NaiveDateTime,
    /// Outcomes of calls already executed this turn.
    pub results: &'a [Value],
    /// What the front agent gathered before handing the turn over.
    pub handoff_note: Option<&'a str>,
}

pub fn transport_guidance(transport: &TransportProfile) -> &'static str {
    if transport.supports_audio {
        "Replies are spoken aloud: short sentences, no lists, no symbols or abbreviations."
    } else if transport.supports_rich_formatting {
        "Replies appear in a chat window: keep them short; simple lists are fine."
    } else {
        "Replies are sent as text messages: plain text, ideally under 320 characters."
    }
}

fn build_system_prompt(ctx: &PlanningContext<'_>) -> String {
    let capabilities = serde_json::to_string(ctx.capabilities).unwrap_or_default();
    let state = serde_json::to_string(ctx.state).unwrap_or_default();
    let mut prompt = format!(
        "{SYSTEM_PROMPT}{}\n\nToday is {} ({}), current time {}.\n{}\n\nAvailable functions:\n{capabilities}\n\nWhat we know so far:\n{state}",
        ctx.tenant.to_prompt(),
        ctx.now.format("%Y-%m-%d"),
        ctx.now.format("%A"),
        ctx.now.format("%H:%M"),
        transport_guidance(ctx.transport),
    );
    if let Some(note) = ctx.handoff_note {
        prompt.push_str(&format!("\n\nFront desk note: {note}"));
    }
    if !ctx.results.is_empty() {
        let results = serde_json::to_string(ctx.results).unwrap_or_default();
        prompt.push_str(&format!(
            "\n\nResults of the calls you made earlier this turn:\n{results}\nDo not repeat a call that already succeeded."
        ));
    }
    prompt
}

pub async fn plan_turn(
    llm: &dyn LlmProvider,
    ctx: &PlanningContext<'_>,
    history: &[TurnMessage],
) -> anyhow::Result<Plan> {
    let system = build_system_prompt(ctx);
    let messages: Vec<Message> = history.iter().map(Message::from).collect();
    let response = llm.chat(&system, &messages).await?;
    Ok(parse_plan(&response))
}

fn parse_plan(response: &str) -> Plan {
    if let Some(plan) = parse_json_reply::<Plan>(response) {
        return plan;
    }

    tracing::warn!("failed to parse decision step output as JSON, replying with raw text");
    Plan {
        reply: Some(response.trim().to_string()).filter(|r| !r.is_empty()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_plan() {
        let json = r#"{
            "facts": {"first_name": "Jane", "last_name": "Doe", "phone": "555-0100",
                      "preferred_date": "2030-01-08", "time_of_day": "morning",
                      "pending_action": "create", "appointment_type": "cleaning"},
            "calls": [{"name": "FindOrCreatePatient", "arguments": {}},
                      {"name": "FindAvailableSlots", "arguments": {"date_from": "2030-01-08"}}],
            "reply": null,
            "needs_results": true
        }"#;
        let plan = parse_plan(json);
        assert_eq!(plan.calls.len(), 2);
        assert_eq!(plan.calls[1].arguments["date_from"], "2030-01-08");
        assert!(plan.needs_results);
        assert_eq!(plan.reply, None);

        let update = plan.facts.to_update();
        assert_eq!(update.patient.first_name, Patch::Set("Jane".to_string()));
        assert_eq!(update.patient.phone, Patch::Set("5550100".to_string()));
        assert_eq!(update.appointment_intent.time_of_day, Patch::Set(TimeOfDay::Morning));
        assert_eq!(update.pending_action, Patch::Set(PendingAction::Create));
        assert!(update.patient.id.is_keep());
    }

    #[test]
    fn test_parse_fenced_plan() {
        let plan = parse_plan("```json\n{\"calls\":[],\"reply\":\"Hello!\"}\n```");
        assert_eq!(plan.reply.as_deref(), Some("Hello!"));
        assert!(plan.calls.is_empty());
    }

    #[test]
    fn test_unparseable_output_becomes_reply() {
        let plan = parse_plan("Sorry, could you repeat that?");
        assert!(plan.calls.is_empty());
        assert_eq!(plan.reply.as_deref(), Some("Sorry, could you repeat that?"));
    }

    #[test]
    fn test_null_and_bad_facts_are_ignored() {
        let plan = parse_plan(
            r#"{"facts":{"first_name":null,"phone":"call me maybe","preferred_date":"tomorrow","last_name":"null"}}"#,
        );
        assert!(plan.facts.to_update().is_empty());
    }

    #[test]
    fn test_numeric_phone_accepted() {
        let plan = parse_plan(r#"{"facts":{"phone":5550100}}"#);
        assert_eq!(
            plan.facts.to_update().patient.phone,
            Patch::Set("5550100".to_string())
        );
    }

    #[test]
    fn test_transport_guidance_varies() {
        assert!(transport_guidance(&TransportProfile::voice()).contains("spoken"));
        assert!(transport_guidance(&TransportProfile::sms()).contains("text messages"));
        assert!(transport_guidance(&TransportProfile::web_chat()).contains("chat window"));
    }
}
