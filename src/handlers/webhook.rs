use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::models::TransportProfile;
use crate::services::conversation::TurnRequest;
use crate::services::messaging::twilio::{twiml, validate_signature};
use crate::state::AppState;

const FALLBACK_REPLY: &str = "Sorry, I'm having trouble right now. Please try again in a moment.";

#[derive(Deserialize)]
pub struct TwilioWebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
}

fn twiml_response(reply: Option<&str>) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], twiml(reply)).into_response()
}

// POST /webhook/sms/:organization_id
pub async fn sms_webhook(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<TwilioWebhookForm>,
) -> Response {
    let from = form.from.trim().to_string();
    let body = form.body.trim().to_string();

    tracing::info!(organization_id = %organization_id, from = %from, "incoming SMS");

    // Signature check is skipped when no auth token is configured (dev mode)
    if !state.config.twilio_auth_token.is_empty() {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing X-Twilio-Signature header");
            return (StatusCode::FORBIDDEN, "Missing signature").into_response();
        }

        // Reconstruct the public URL, honouring a reverse proxy
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let url = format!("{proto}://{host}/webhook/sms/{organization_id}");

        let params = [
            ("From", form.from.as_str()),
            ("To", form.to.as_str()),
            ("Body", form.body.as_str()),
            ("MessageSid", form.message_sid.as_deref().unwrap_or("")),
        ];

        if !validate_signature(&state.config.twilio_auth_token, signature, &url, &params) {
            tracing::warn!("invalid Twilio signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let request = TurnRequest {
        session_id: format!("sms:{organization_id}:{from}"),
        organization_id,
        utterance: body,
        history: None,
        transport: TransportProfile::sms(),
    };

    match state.desk.handle_turn(request).await {
        Ok(reply) => twiml_response(Some(&reply.reply)),
        Err(e) => {
            tracing::error!(error = %e, from = %from, "SMS turn failed");
            twiml_response(Some(FALLBACK_REPLY))
        }
    }
}
