use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::models::{ParamKind, ParamSpec, TurnMessage};
use crate::services::ai::{parse_json_reply, LlmProvider, Message};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction call failed: {0}")]
    Provider(anyhow::Error),

    #[error("extraction returned unusable output: {0}")]
    Malformed(String),
}

fn format_hint(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::String | ParamKind::Id => "text",
        ParamKind::Integer => "whole number",
        ParamKind::Date => "date as YYYY-MM-DD",
        ParamKind::DateTime => "date and time as YYYY-MM-DDTHH:MM",
        ParamKind::Phone => "phone number digits",
        ParamKind::TimeOfDay => "one of morning, afternoon, evening",
    }
}

fn build_prompt(fields: &[&ParamSpec], today: NaiveDate) -> String {
    let wanted = fields
        .iter()
        .map(|f| format!("- \"{}\": {} ({})", f.name, f.label(), format_hint(f.kind)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Extract the following fields from the conversation. Today is {today}.\n\
         {wanted}\n\n\
         Return ONLY a JSON object with exactly these keys. Use null for any field the \
         caller has not clearly stated. Do not guess."
    )
}

/// One bounded extraction call for `fields`. Returns only the fields the
/// caller actually stated; absent keys mean "not stated".
pub async fn extract_fields(
    llm: &dyn LlmProvider,
    fields: &[&ParamSpec],
    recent: &[TurnMessage],
    today: NaiveDate,
) -> Result<Map<String, Value>, ExtractionError> {
    if fields.is_empty() || recent.is_empty() {
        return Ok(Map::new());
    }

    let system = build_prompt(fields, today);
    let messages: Vec<Message> = recent.iter().map(Message::from).collect();
    let response = llm
        .chat(&system, &messages)
        .await
        .map_err(ExtractionError::Provider)?;

    let object: Map<String, Value> = parse_json_reply(&response)
        .ok_or_else(|| ExtractionError::Malformed(response.chars().take(200).collect()))?;

    Ok(fields
        .iter()
        .filter_map(|f| {
            let value = object.get(&f.name)?;
            let value = f.normalize(value)?;
            Some((f.name.clone(), value))
        })
        .collect())
}
