use chrono::NaiveDateTime;

use crate::models::{Appointment, SlotCandidate, TransportProfile};

/// Phrases that tell the caller a booking change went through.
const COMMITMENT_PHRASES: &[&str] = &[
    "you're booked",
    "you are booked",
    "booked you",
    "i've booked",
    "i have booked",
    "is booked",
    "you're all set",
    "you are all set",
    "is confirmed",
    "confirmed for",
    "has been scheduled",
    "is scheduled for",
    "has been moved",
    "has been rescheduled",
    "has been cancelled",
    "has been canceled",
    "i've cancelled",
    "i've canceled",
];

pub fn claims_commitment(text: &str) -> bool {
    let lower = text.to_lowercase().replace('\u{2019}', "'");
    COMMITMENT_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn format_time(dt: &NaiveDateTime, transport: &TransportProfile) -> String {
    if transport.supports_audio {
        dt.format("%A, %B %-d at %-I:%M %p").to_string()
    } else {
        dt.format("%a %b %-d, %-I:%M %p").to_string()
    }
}

/// "a", "a or b", "a, b or c".
pub fn join_list(items: &[String], conjunction: &str) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} {conjunction} {last}", init.join(", ")),
    }
}

/// The clarifying question for parameters nobody has supplied yet.
pub fn ask_for(labels: &[String]) -> String {
    let mut unique: Vec<String> = Vec::new();
    for label in labels {
        if !unique.contains(label) {
            unique.push(label.clone());
        }
    }
    format!("Before I can do that, could you tell me {}?", join_list(&unique, "and"))
}

pub fn offer(slots: &[SlotCandidate], transport: &TransportProfile) -> String {
    if transport.supports_audio {
        let same_day = slots.windows(2).all(|w| w[0].start.date() == w[1].start.date());
        let items: Vec<String> = slots
            .iter()
            .map(|s| {
                if same_day {
                    format!("{} with {}", s.start.format("%-I:%M %p"), s.provider_name)
                } else {
                    format!("{} with {}", format_time(&s.start, transport), s.provider_name)
                }
            })
            .collect();
        let day = match (same_day, slots.first()) {
            (true, Some(first)) => format!(" on {}", first.start.format("%A, %B %-d")),
            _ => String::new(),
        };
        format!("I have {}{day}. Which works best for you?", join_list(&items, "or"))
    } else if transport.supports_rich_formatting {
        let lines: Vec<String> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {} with {}", i + 1, format_time(&s.start, transport), s.provider_name))
            .collect();
        format!("Here are the openings I found:\n{}\nWhich one works for you?", lines.join("\n"))
    } else {
        let items: Vec<String> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}) {} ({})", i + 1, format_time(&s.start, transport), s.provider_name))
            .collect();
        format!("Openings: {}. Reply with the one you want.", items.join(" "))
    }
}

pub fn appointment_list(appointments: &[&Appointment], transport: &TransportProfile) -> String {
    let items: Vec<String> = appointments
        .iter()
        .map(|a| {
            let what = a.appointment_type.as_deref().unwrap_or("appointment");
            format!("a {what} on {}", format_time(&a.start_time, transport))
        })
        .collect();
    join_list(&items, "and")
}
