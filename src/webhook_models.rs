use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::errors::AppError;

/// Webhook routes Brightcall is configured to call, one per event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CallStarted,
    CallRinging,
    CallAnswered,
    CallEnded,
    SmsEvent,
    WebphoneSummary,
    AiTranscriptionSummary,
    SpeedToLead,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::CallStarted,
        EventKind::CallRinging,
        EventKind::CallAnswered,
        EventKind::CallEnded,
        EventKind::SmsEvent,
        EventKind::WebphoneSummary,
        EventKind::AiTranscriptionSummary,
        EventKind::SpeedToLead,
    ];

    /// Resolve a route segment against the allow-list. Matching is exact.
    pub fn from_route(route: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.route() == route)
    }

    pub fn route(self) -> &'static str {
        match self {
            EventKind::CallStarted => "callStarted",
            EventKind::CallRinging => "callRinging",
            EventKind::CallAnswered => "callAnswered",
            EventKind::CallEnded => "callEnded",
            EventKind::SmsEvent => "smsEvent",
            EventKind::WebphoneSummary => "webphoneSummary",
            EventKind::AiTranscriptionSummary => "aiTranscriptionSummary",
            EventKind::SpeedToLead => "speedToLead",
        }
    }

    /// Name used in the webhook-payload log entry.
    pub fn log_label(self) -> &'static str {
        match self {
            EventKind::CallStarted => "call_started",
            EventKind::CallRinging => "call_ringing",
            EventKind::CallAnswered => "call_answered",
            EventKind::CallEnded => "call_ended",
            EventKind::SmsEvent => "sms_event",
            EventKind::WebphoneSummary => "webphone_summary",
            EventKind::AiTranscriptionSummary => "ai_transcription",
            EventKind::SpeedToLead => "speed_to_lead",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route())
    }
}

/// Call direction as reported in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl CallDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INCOMING" | "INBOUND" => Some(CallDirection::Incoming),
            "OUTGOING" | "OUTBOUND" => Some(CallDirection::Outgoing),
            _ => None,
        }
    }

    /// Bitrix `telephony.externalcall.register` TYPE code.
    pub fn telephony_code(self) -> u8 {
        match self {
            CallDirection::Outgoing => 1,
            CallDirection::Incoming => 2,
        }
    }
}

/// Payload shared by the call lifecycle events and the webphone summary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub line_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_timestamp_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub answer_timestamp_ms: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_timestamp_ms: Option<i64>,
    /// URL or path of the call recording, present once the call has ended.
    #[serde(default, alias = "recordingLink", alias = "recording")]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub widget_name: Option<String>,
    /// Origin of the call, e.g. "Facebook".
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl CallPayload {
    pub fn direction(&self) -> Option<CallDirection> {
        self.call_type.as_deref().and_then(CallDirection::parse)
    }

    /// Best timestamp for "when did this call start".
    pub fn started_at_ms(&self) -> Option<i64> {
        self.start_timestamp_ms.or(self.timestamp_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsPayload {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub agent_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionPayload {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub transcription: Option<String>,
}

/// Lead captured by a Brightcall speed-to-lead widget before any call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedToLeadPayload {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub lead_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub lead_phone: Option<String>,
    #[serde(default)]
    pub lead_email: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub widget_name: Option<String>,
    #[serde(default)]
    pub agent_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp_ms: Option<i64>,
}

impl SpeedToLeadPayload {
    pub fn phone(&self) -> Option<&str> {
        self.lead_phone.as_deref()
    }
}

/// A decoded webhook event. The variant is chosen by the route, never by
/// the payload.
#[derive(Debug, Clone)]
pub enum Event {
    CallStarted(CallPayload),
    CallRinging(CallPayload),
    CallAnswered(CallPayload),
    CallEnded(CallPayload),
    SmsEvent(SmsPayload),
    WebphoneSummary(CallPayload),
    AiTranscriptionSummary(TranscriptionPayload),
    SpeedToLead(SpeedToLeadPayload),
}

impl Event {
    /// Decode a raw body for the given route.
    ///
    /// The body must be a JSON object. When it carries `eventType`, that tag
    /// has to agree with the route.
    pub fn decode(kind: EventKind, body: &[u8]) -> Result<Self, AppError> {
        let value: Value = serde_json::from_slice(body)?;
        let Some(object) = value.as_object() else {
            return Err(AppError::BadRequest(
                "Webhook body must be a JSON object".to_string(),
            ));
        };

        if let Some(tag) = object.get("eventType").and_then(Value::as_str) {
            if tag != kind.route() {
                return Err(AppError::BadRequest(format!(
                    "eventType '{}' does not match route '{}'",
                    tag, kind
                )));
            }
        }

        let event = match kind {
            EventKind::CallStarted => Event::CallStarted(serde_json::from_value(value)?),
            EventKind::CallRinging => Event::CallRinging(serde_json::from_value(value)?),
            EventKind::CallAnswered => Event::CallAnswered(serde_json::from_value(value)?),
            EventKind::CallEnded => Event::CallEnded(serde_json::from_value(value)?),
            EventKind::SmsEvent => Event::SmsEvent(serde_json::from_value(value)?),
            EventKind::WebphoneSummary => Event::WebphoneSummary(serde_json::from_value(value)?),
            EventKind::AiTranscriptionSummary => {
                Event::AiTranscriptionSummary(serde_json::from_value(value)?)
            }
            EventKind::SpeedToLead => Event::SpeedToLead(serde_json::from_value(value)?),
        };

        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::CallStarted(_) => EventKind::CallStarted,
            Event::CallRinging(_) => EventKind::CallRinging,
            Event::CallAnswered(_) => EventKind::CallAnswered,
            Event::CallEnded(_) => EventKind::CallEnded,
            Event::SmsEvent(_) => EventKind::SmsEvent,
            Event::WebphoneSummary(_) => EventKind::WebphoneSummary,
            Event::AiTranscriptionSummary(_) => EventKind::AiTranscriptionSummary,
            Event::SpeedToLead(_) => EventKind::SpeedToLead,
        }
    }

    /// Payload of the call-bearing variants.
    pub fn call(&self) -> Option<&CallPayload> {
        match self {
            Event::CallStarted(p)
            | Event::CallRinging(p)
            | Event::CallAnswered(p)
            | Event::CallEnded(p)
            | Event::WebphoneSummary(p) => Some(p),
            _ => None,
        }
    }

    /// External call identifier used as the CRM deduplication key.
    pub fn call_id(&self) -> Option<&str> {
        let id = match self {
            Event::AiTranscriptionSummary(p) => p.call_id.as_deref(),
            Event::SpeedToLead(p) => p.call_id.as_deref(),
            Event::SmsEvent(_) => None,
            _ => self.call().and_then(|p| p.call_id.as_deref()),
        };
        id.filter(|s| !s.trim().is_empty())
    }

    /// Ended calls and outgoing webphone summaries close a call's lifecycle.
    pub fn is_terminal(&self) -> bool {
        match self {
            Event::CallEnded(_) => true,
            Event::WebphoneSummary(p) => p.direction() == Some(CallDirection::Outgoing),
            _ => false,
        }
    }

    pub fn recording_reference(&self) -> Option<&str> {
        self.call()
            .and_then(|p| p.recording_url.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Terminal response for one webhook request.
#[derive(Debug, Clone)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub body: Value,
}

impl WebhookReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({ "message": message.into() }),
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "error": err.public_message() }),
        }
    }
}

impl IntoResponse for WebhookReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Int(n)) => Ok(Some(n)),
        Some(NumberOrString::Float(f)) => Ok(Some(f as i64)),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected integer, got '{}'", s))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string, got {}",
            other
        ))),
    }
}
