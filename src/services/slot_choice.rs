use chrono::{Datelike, NaiveTime, Timelike, Weekday};

use crate::models::SlotCandidate;

const AFFIRMATIONS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "perfect", "great", "fine", "works",
    "good", "book", "confirm", "correct",
];

const NEGATIONS: &[&str] = &["no", "not", "nope", "don't", "dont", "neither", "none", "can't", "cant"];

const ORDINALS: &[(&str, usize)] = &[
    ("first", 0),
    ("1st", 0),
    ("second", 1),
    ("2nd", 1),
    ("third", 2),
    ("3rd", 2),
    ("fourth", 3),
    ("4th", 3),
];

fn words(utterance: &str) -> Vec<String> {
    utterance
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == ':' || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Clock times mentioned in the utterance. Without am/pm a time is
/// ambiguous, so both readings are returned.
fn mentioned_times(words: &[String]) -> Vec<NaiveTime> {
    let mut times = Vec::new();
    for (i, word) in words.iter().enumerate() {
        let (digits, suffix) = match word.find(|c: char| c.is_alphabetic()) {
            Some(pos) => (&word[..pos], &word[pos..]),
            None => (word.as_str(), ""),
        };
        let meridiem = match suffix {
            "am" | "pm" => Some(suffix),
            "" => match words.get(i + 1).map(String::as_str) {
                Some("am") | Some("a") => Some("am"),
                Some("pm") | Some("p") => Some("pm"),
                _ => None,
            },
            _ => continue,
        };

        let (hour, minute) = match digits.split_once(':') {
            Some((h, m)) => match (h.parse::<u32>(), m.parse::<u32>()) {
                (Ok(h), Ok(m)) => (h, m),
                _ => continue,
            },
            // bare numbers only count with am/pm or "o'clock"
            None => match digits.parse::<u32>() {
                Ok(h) if meridiem.is_some()
                    || words.get(i + 1).map(String::as_str) == Some("o'clock") =>
                {
                    (h, 0)
                }
                _ => continue,
            },
        };
        if !(1..=23).contains(&hour) || minute > 59 {
            continue;
        }

        let hours: Vec<u32> = match meridiem {
            Some("pm") if hour < 12 => vec![hour + 12],
            Some("am") if hour == 12 => vec![0],
            Some(_) => vec![hour],
            None if hour < 12 => vec![hour, hour + 12],
            None => vec![hour],
        };
        times.extend(hours.into_iter().filter_map(|h| NaiveTime::from_hms_opt(h, minute, 0)));
    }
    times
}

fn mentioned_weekday(words: &[String]) -> Option<Weekday> {
    words.iter().find_map(|w| {
        let w = w.trim_end_matches('s');
        match w {
            "monday" | "mon" => Some(Weekday::Mon),
            "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
            "wednesday" | "wed" => Some(Weekday::Wed),
            "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
            "friday" | "fri" => Some(Weekday::Fri),
            "saturday" | "sat" => Some(Weekday::Sat),
            "sunday" | "sun" => Some(Weekday::Sun),
            _ => None,
        }
    })
}

fn mentioned_ordinal(words: &[String], offered: usize) -> Option<usize> {
    // a lone number answers "which option"
    if let [only] = words {
        if let Ok(n) = only.parse::<usize>() {
            return n.checked_sub(1);
        }
    }
    for (i, word) in words.iter().enumerate() {
        if let Some((_, idx)) = ORDINALS.iter().find(|(w, _)| w == word) {
            return Some(*idx);
        }
        if word == "last" || word == "latest" {
            return offered.checked_sub(1);
        }
        if matches!(word.as_str(), "option" | "number" | "#") {
            if let Some(n) = words.get(i + 1).and_then(|n| n.parse::<usize>().ok()) {
                return n.checked_sub(1);
            }
        }
    }
    None
}

/// Narrows several matches by the provider's name or the weekday, if the
/// caller mentioned one. `None` when the choice stays ambiguous.
fn disambiguate(words: &[String], offered: &[SlotCandidate], matches: Vec<usize>) -> Option<usize> {
    if matches.len() == 1 {
        return matches.first().copied();
    }
    let by_day: Vec<usize> = match mentioned_weekday(words) {
        Some(day) => matches
            .iter()
            .copied()
            .filter(|&i| offered[i].start.weekday() == day)
            .collect(),
        None => matches,
    };
    if by_day.len() == 1 {
        return by_day.first().copied();
    }
    let by_provider: Vec<usize> = by_day
        .into_iter()
        .filter(|&i| {
            offered[i]
                .provider_name
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|part| part.len() > 2 && *part != "dr")
                .any(|part| words.iter().any(|w| w == part))
        })
        .collect();
    (by_provider.len() == 1).then(|| by_provider[0])
}

/// Which offered slot, if any, the caller just picked.
pub fn match_offered_slot(utterance: &str, offered: &[SlotCandidate]) -> Option<usize> {
    if offered.is_empty() {
        return None;
    }
    let words = words(utterance);
    if words.iter().any(|w| NEGATIONS.contains(&w.as_str()) && w != "no") {
        return None;
    }

    let times = mentioned_times(&words);
    if !times.is_empty() {
        let matches: Vec<usize> = offered
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                let t = slot.start.time();
                times
                    .iter()
                    .any(|m| m.hour() == t.hour() && m.minute() == t.minute())
            })
            .map(|(i, _)| i)
            .collect();
        return disambiguate(&words, offered, matches);
    }

    if let Some(idx) = mentioned_ordinal(&words, offered.len()) {
        return (idx < offered.len()).then_some(idx);
    }

    if offered.len() == 1
        && !words.iter().any(|w| w == "no")
        && words.iter().any(|w| AFFIRMATIONS.contains(&w.as_str()))
    {
        return Some(0);
    }

    let by_day = mentioned_weekday(&words).map(|day| {
        offered
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start.weekday() == day)
            .map(|(i, _)| i)
            .collect::<Vec<_>>()
    });
    match by_day {
        Some(matches) if matches.len() == 1 => matches.first().copied(),
        _ => None,
    }
}
