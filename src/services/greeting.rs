use serde::Serialize;

use crate::models::{normalize_phone, TenantConfig, TransportProfile};

const RESCHEDULE_WORDS: &[&str] = &["reschedule", "move my", "change my appointment", "different time", "push back"];
const CANCEL_WORDS: &[&str] = &["cancel", "call off"];
const LOOKUP_WORDS: &[&str] = &["when is my", "do i have", "my next appointment", "check my appointment", "confirm my appointment"];
const BOOK_WORDS: &[&str] = &[
    "book", "appointment", "schedule", "cleaning", "checkup", "check-up", "exam", "filling",
    "crown", "whitening", "toothache", "tooth ache", "come in", "see the dentist", "available", "opening",
];
const HOURS_WORDS: &[&str] = &["hours", "open", "close", "closing", "what time do you"];
const LOCATION_WORDS: &[&str] = &["where", "address", "located", "location", "directions", "parking"];
const NAME_MARKERS: &[&str] = &["my name is ", "this is ", "i'm ", "i am ", "it's for ", " for "];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrontIntent {
    Book,
    Reschedule,
    Cancel,
    Lookup,
    /// A follow-up inside a workflow that is already running.
    Continue,
}

impl FrontIntent {
    fn describe(&self) -> &'static str {
        match self {
            FrontIntent::Book => "book an appointment",
            FrontIntent::Reschedule => "reschedule an existing appointment",
            FrontIntent::Cancel => "cancel an existing appointment",
            FrontIntent::Lookup => "check on an existing appointment",
            FrontIntent::Continue => "continue the current request",
        }
    }
}

/// What the front agent hands to the orchestrator.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HandoffSummary {
    pub intent: FrontIntent,
    pub name_fragment: Option<String>,
    pub phone_fragment: Option<String>,
}

impl HandoffSummary {
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("Caller wants to {}.", self.intent.describe())];
        if let Some(name) = &self.name_fragment {
            parts.push(format!("They gave the name {name}."));
        }
        if let Some(phone) = &self.phone_fragment {
            parts.push(format!("They gave the phone number {phone}."));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GreetingOutcome {
    DirectReply(String),
    Handoff(HandoffSummary),
}

/// Cheap first pass over each utterance. Answers stateless questions itself
/// and only hands off once there is a usable signal to act on.
pub struct GreetingAgent<'a> {
    config: &'a TenantConfig,
    transport: &'a TransportProfile,
    choosing: bool,
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// Too little recognizable text to act on.
fn is_garbled(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible == 0 {
        return true;
    }
    if letters + digits < 2 {
        return true;
    }
    // mostly symbols or noise transcription
    (letters + digits) * 2 < visible
}

/// A lone option number such as "2" or "#3.".
fn is_option_number(text: &str) -> bool {
    let core = text.trim_matches(|c: char| !c.is_alphanumeric());
    core.len() == 1 && core.chars().all(|c| c.is_ascii_digit())
}

/// The longest run of digits, allowing the separators people use in phone
/// numbers.
fn digit_run(text: &str) -> String {
    let mut best = String::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if matches!(c, '-' | ' ' | '(' | ')' | '.' | '+') && !current.is_empty() {
            continue;
        } else {
            if current.len() > best.len() {
                best = std::mem::take(&mut current);
            }
            current.clear();
        }
    }
    if current.len() > best.len() {
        best = current;
    }
    best
}

fn name_fragment(original: &str) -> Option<String> {
    // ASCII folding keeps byte offsets valid for `original`.
    let lower = original.to_ascii_lowercase();
    for marker in NAME_MARKERS {
        let Some(pos) = lower.find(marker) else {
            continue;
        };
        let Some(rest) = original.get(pos + marker.len()..) else {
            continue;
        };
        let name: Vec<&str> = rest
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphabetic() && c != '\'' && c != '-'))
            .take_while(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
            .take(2)
            .collect();
        if !name.is_empty() {
            return Some(name.join(" "));
        }
    }
    None
}

impl<'a> GreetingAgent<'a> {
    pub fn new(config: &'a TenantConfig, transport: &'a TransportProfile) -> Self {
        Self {
            config,
            transport,
            choosing: false,
        }
    }

    /// The session has slots on offer, so a bare option number is an answer.
    pub fn choosing_from_offers(mut self, choosing: bool) -> Self {
        self.choosing = choosing;
        self
    }

    fn detect_intent(text: &str) -> Option<FrontIntent> {
        if contains_any(text, RESCHEDULE_WORDS) {
            Some(FrontIntent::Reschedule)
        } else if contains_any(text, CANCEL_WORDS) {
            Some(FrontIntent::Cancel)
        } else if contains_any(text, LOOKUP_WORDS) {
            Some(FrontIntent::Lookup)
        } else if contains_any(text, BOOK_WORDS) {
            Some(FrontIntent::Book)
        } else {
            None
        }
    }

    fn call_us(&self) -> String {
        if self.config.practice.phone.is_empty() {
            "please give the office a call".to_string()
        } else {
            format!("please call us at {}", self.config.practice.phone)
        }
    }

    fn hours_reply(&self) -> String {
        let practice = &self.config.identity.practice_name;
        if self.config.practice.business_hours.is_empty() {
            format!("For {practice}'s current hours, {}.", self.call_us())
        } else {
            format!("{practice} is open {}.", self.config.practice.business_hours)
        }
    }

    fn location_reply(&self) -> String {
        if self.config.practice.address.is_empty() {
            format!("For directions, {}.", self.call_us())
        } else {
            format!("You can find us at {}.", self.config.practice.address)
        }
    }

    fn reprompt(&self) -> String {
        if self.transport.supports_audio {
            "Sorry, I didn't quite catch that. Could you say it again?".to_string()
        } else {
            "Sorry, I didn't understand that. Could you rephrase?".to_string()
        }
    }

    pub fn handle(&self, utterance: &str, is_first_turn: bool) -> GreetingOutcome {
        let original = utterance.trim();
        if is_garbled(original) && !(self.choosing && is_option_number(original)) {
            return GreetingOutcome::DirectReply(self.reprompt());
        }
        let text = original.to_lowercase();

        let intent = Self::detect_intent(&text);
        let digits = digit_run(&text);
        let mentions_phone = contains_any(&text, &["phone", "number", "call me", "reach me"]);
        let phone_fragment = normalize_phone(&digits);

        // A number that is too short to be a phone, said as one.
        if mentions_phone && phone_fragment.is_none() && digits.len() >= 3 {
            let reply = if self.transport.supports_audio {
                "I only caught part of that number. Could you say the full phone number, slowly?"
            } else {
                "That number looks incomplete. Could you send the full phone number?"
            };
            return GreetingOutcome::DirectReply(reply.to_string());
        }

        let Some(intent) = intent else {
            if contains_any(&text, HOURS_WORDS) {
                return GreetingOutcome::DirectReply(self.hours_reply());
            }
            if contains_any(&text, LOCATION_WORDS) {
                return GreetingOutcome::DirectReply(self.location_reply());
            }
            if is_first_turn {
                return GreetingOutcome::DirectReply(self.config.greeting());
            }
            return GreetingOutcome::Handoff(HandoffSummary {
                intent: FrontIntent::Continue,
                name_fragment: name_fragment(original),
                phone_fragment,
            });
        };

        GreetingOutcome::Handoff(HandoffSummary {
            intent,
            name_fragment: name_fragment(original),
            phone_fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TenantConfig {
        TenantConfig::from_json(
            r#"{"identity":{"practice_name":"Bright Smiles"},
                "practice":{"business_hours":"Mon-Fri 9am-5pm","address":"12 Elm St","phone":"555-0199"}}"#,
        )
        .unwrap()
    }

    fn handle(utterance: &str, first: bool) -> GreetingOutcome {
        let cfg = config();
        let transport = TransportProfile::voice();
        GreetingAgent::new(&cfg, &transport).handle(utterance, first)
    }

    #[test]
    fn test_hours_answered_directly() {
        match handle("what are your hours", true) {
            GreetingOutcome::DirectReply(reply) => assert!(reply.contains("Mon-Fri 9am-5pm")),
            other => panic!("expected direct reply, got {other:?}"),
        }
    }

    #[test]
    fn test_location_answered_directly() {
        assert_eq!(
            handle("where are you located?", true),
            GreetingOutcome::DirectReply("You can find us at 12 Elm St.".to_string())
        );
    }

    #[test]
    fn test_booking_hands_off_with_fragments() {
        let outcome = handle("Book a cleaning for Jane Doe, phone 555-0100, tomorrow morning", true);
        assert_eq!(
            outcome,
            GreetingOutcome::Handoff(HandoffSummary {
                intent: FrontIntent::Book,
                name_fragment: Some("Jane Doe".to_string()),
                phone_fragment: Some("5550100".to_string()),
            })
        );
    }

    #[test]
    fn test_reschedule_beats_book() {
        match handle("I need to reschedule my appointment", true) {
            GreetingOutcome::Handoff(summary) => {
                assert_eq!(summary.intent, FrontIntent::Reschedule);
                assert_eq!(summary.name_fragment, None);
            }
            other => panic!("expected handoff, got {other:?}"),
        }
        match handle("please cancel my appointment", false) {
            GreetingOutcome::Handoff(summary) => assert_eq!(summary.intent, FrontIntent::Cancel),
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[test]
    fn test_hours_question_with_booking_hands_off() {
        assert!(matches!(
            handle("are you open tomorrow, I want to book a checkup", true),
            GreetingOutcome::Handoff(HandoffSummary { intent: FrontIntent::Book, .. })
        ));
    }

    #[test]
    fn test_garbled_input_reprompts() {
        for noise in ["", "   ", "...", "%$#@!", "?"] {
            assert!(
                matches!(handle(noise, true), GreetingOutcome::DirectReply(_)),
                "{noise:?} should re-prompt"
            );
        }
    }

    #[test]
    fn test_partial_phone_reprompts() {
        match handle("my phone number is 555 01", false) {
            GreetingOutcome::DirectReply(reply) => assert!(reply.contains("part of that number")),
            other => panic!("expected re-prompt, got {other:?}"),
        }
    }

    #[test]
    fn test_first_turn_small_talk_greets() {
        match handle("hello", true) {
            GreetingOutcome::DirectReply(reply) => assert!(reply.contains("Bright Smiles")),
            other => panic!("expected greeting, got {other:?}"),
        }
    }

    #[test]
    fn test_follow_up_continues_workflow() {
        assert!(matches!(
            handle("the 9:30 one", false),
            GreetingOutcome::Handoff(HandoffSummary { intent: FrontIntent::Continue, .. })
        ));
    }

    #[test]
    fn test_option_number_continues_when_choosing() {
        let cfg = config();
        let transport = TransportProfile::sms();
        let agent = GreetingAgent::new(&cfg, &transport).choosing_from_offers(true);
        for answer in ["2", "3.", "#1"] {
            assert!(
                matches!(
                    agent.handle(answer, false),
                    GreetingOutcome::Handoff(HandoffSummary { intent: FrontIntent::Continue, .. })
                ),
                "{answer:?} should reach the workflow"
            );
        }
        assert!(matches!(handle("2", false), GreetingOutcome::DirectReply(_)));
    }

    #[test]
    fn test_non_ascii_names_do_not_split_characters() {
        assert!(matches!(
            handle("Book İ for Éamon", true),
            GreetingOutcome::Handoff(HandoffSummary { intent: FrontIntent::Book, .. })
        ));
        assert_eq!(name_fragment("this is Zoë Çelik"), Some("Zoë Çelik".to_string()));
        assert_eq!(name_fragment("İİ this is Ana"), Some("Ana".to_string()));
    }

    #[test]
    fn test_name_fragment_markers() {
        assert_eq!(name_fragment("Hi, this is Maria Lopez"), Some("Maria Lopez".to_string()));
        assert_eq!(name_fragment("my name is bob"), None);
        assert_eq!(name_fragment("book a cleaning for tomorrow"), None);
    }

    #[test]
    fn test_summary_description() {
        let summary = HandoffSummary {
            intent: FrontIntent::Book,
            name_fragment: Some("Jane Doe".to_string()),
            phone_fragment: None,
        };
        assert_eq!(
            summary.describe(),
            "Caller wants to book an appointment. They gave the name Jane Doe."
        );
    }
}
