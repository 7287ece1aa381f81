//! Event → lead mapping.
//!
//! Everything here is pure except [`resolve_responsible_person`], which does
//! one read-only CRM lookup. A draft is built completely before the caller
//! writes anything to the CRM.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde_json::json;

use crate::config::{Config, CrmFieldCodes};
use crate::crm::{CrmClient, LeadFields, UserId};
use crate::errors::AppError;
use crate::webhook_models::{CallDirection, CallPayload, Event, SpeedToLeadPayload};

const NOT_AVAILABLE: &str = "N/A";

/// Canonical lead built from one webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadDraft {
    pub title: String,
    pub name: String,
    /// Single work-typed phone entry.
    pub phone: String,
    pub email: Option<String>,
    pub comments: String,
    pub source_id: String,
    pub collection_source_id: String,
    pub assigned_by_id: UserId,
    /// `assigned_by_id` is the configured default, not a resolved agent.
    pub assignee_is_default: bool,
    pub external_call_id: Option<String>,
    /// Call or capture time as an ISO-8601 instant in the display zone.
    pub call_time: Option<String>,
    /// Only set by the reconciler on the update path.
    pub return_customer: bool,
}

impl LeadDraft {
    /// Render the draft in Bitrix lead field codes.
    pub fn to_crm_fields(&self, codes: &CrmFieldCodes) -> LeadFields {
        let mut fields = LeadFields::new();
        fields.insert("TITLE".into(), json!(self.title));
        fields.insert("NAME".into(), json!(self.name));
        fields.insert(
            "PHONE".into(),
            json!([{ "VALUE": self.phone, "VALUE_TYPE": "WORK" }]),
        );
        if let Some(email) = &self.email {
            fields.insert(
                "EMAIL".into(),
                json!([{ "VALUE": email, "VALUE_TYPE": "WORK" }]),
            );
        }
        fields.insert("COMMENTS".into(), json!(self.comments));
        fields.insert("SOURCE_ID".into(), json!(self.source_id));
        fields.insert(codes.collection_source.clone(), json!(self.collection_source_id));
        if let Some(call_time) = &self.call_time {
            fields.insert(codes.call_time.clone(), json!(call_time));
        }
        if let Some(call_id) = &self.external_call_id {
            fields.insert(codes.external_call_id.clone(), json!(call_id));
        }
        fields.insert("ASSIGNED_BY_ID".into(), json!(self.assigned_by_id));
        if self.return_customer {
            fields.insert(codes.return_customer.clone(), json!("Y"));
        }
        fields
    }

    /// Fields for updating a lead that already exists.
    ///
    /// A default assignee or an empty report would overwrite what an earlier
    /// event for the same call wrote, so both are left out.
    pub fn to_update_fields(&self, codes: &CrmFieldCodes) -> LeadFields {
        let mut fields = self.to_crm_fields(codes);
        if self.assignee_is_default {
            fields.remove("ASSIGNED_BY_ID");
        }
        if self.comments.is_empty() {
            fields.remove("COMMENTS");
        }
        fields
    }
}

fn local_time(ts_ms: i64, tz: Tz) -> Option<DateTime<Tz>> {
    DateTime::<Utc>::from_timestamp_millis(ts_ms).map(|utc| utc.with_timezone(&tz))
}

/// Epoch milliseconds → `2023-11-15T02:13:20+04:00` in `tz`.
pub fn ts_to_iso(ts_ms: i64, tz: Tz) -> Option<String> {
    local_time(ts_ms, tz).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
}

/// Epoch milliseconds → `November 15, 2023 at 02:13 AM (+04)` in `tz`.
pub fn ts_to_human(ts_ms: i64, tz: Tz) -> String {
    local_time(ts_ms, tz)
        .map(|dt| dt.format("%B %-d, %Y at %I:%M %p (%Z)").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn human_or_na(ts_ms: Option<i64>, tz: Tz) -> String {
    ts_ms
        .map(|ms| ts_to_human(ms, tz))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Whole seconds between two epoch-millisecond timestamps, never negative.
pub fn call_duration_secs(end_ms: i64, start_ms: i64) -> i64 {
    (end_ms.saturating_sub(start_ms) / 1000).max(0)
}

/// E.164 when the number parses for `region`, otherwise the trimmed input.
pub fn normalize_phone(raw: &str, region: CountryId) -> String {
    let trimmed = raw.trim();
    match phonenumber::parse(Some(region), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            number.format().mode(Mode::E164).to_string()
        }
        Ok(_) | Err(_) => {
            tracing::debug!("Keeping phone '{}' as received", trimmed);
            trimmed.to_string()
        }
    }
}

/// Validate an agent or lead email before using it.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .map(|re| re.is_match(email))
    .unwrap_or(false)
}

/// Source and collection-source ids for the lead's origin.
///
/// Facebook traffic has its own pair; everything else is Brightcall.
pub fn select_sources<'a>(origin: Option<&str>, config: &'a Config) -> (&'a str, &'a str) {
    match origin.map(str::trim) {
        Some(o) if o.eq_ignore_ascii_case("facebook") => (
            config.facebook_source_id.as_str(),
            config.facebook_collection_source_id.as_str(),
        ),
        _ => (
            config.brightcall_source_id.as_str(),
            config.call_collection_source_id.as_str(),
        ),
    }
}

/// Who a lead is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignee {
    /// CRM user matched from the agent email.
    Agent(UserId),
    /// Configured fallback user.
    Default(UserId),
}

impl Assignee {
    pub fn user_id(self) -> UserId {
        match self {
            Assignee::Agent(id) | Assignee::Default(id) => id,
        }
    }
}

/// Agent email → CRM user, or the default user when the email is missing,
/// malformed, unknown to the CRM, or the lookup fails.
pub async fn resolve_responsible_person(
    crm: &dyn CrmClient,
    email: Option<&str>,
    default_id: UserId,
) -> Assignee {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        tracing::debug!("No agent email, assigning to default user {}", default_id);
        return Assignee::Default(default_id);
    };

    if !is_valid_email(email) {
        tracing::warn!("Malformed agent email '{}', assigning to default user", email);
        return Assignee::Default(default_id);
    }

    match crm.find_user_by_email(email).await {
        Ok(Some(user_id)) => Assignee::Agent(user_id),
        Ok(None) => {
            tracing::warn!("No CRM user for agent email {}, using default", email);
            Assignee::Default(default_id)
        }
        Err(e) => {
            tracing::warn!("Responsible person lookup failed for {}: {}", email, e);
            Assignee::Default(default_id)
        }
    }
}

fn required_field<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing required field: {}", name)))
}

fn placeholder_name(phone: &str) -> String {
    format!("Unknown Caller from Brightcall ({})", phone)
}

/// Build the full lead draft for an event.
///
/// Fails with [`AppError::Validation`] when the event lacks the phone (or,
/// for call events, the call id) the lead is keyed on.
pub async fn build_lead_draft(
    event: &Event,
    config: &Config,
    crm: &dyn CrmClient,
) -> Result<LeadDraft, AppError> {
    let tz = config.display_timezone;
    let comments = build_comment(event, tz);

    let (title, name, raw_phone, email, origin, agent_email, call_time_ms) = match event {
        Event::CallStarted(p)
        | Event::CallRinging(p)
        | Event::CallAnswered(p)
        | Event::CallEnded(p)
        | Event::WebphoneSummary(p) => {
            required_field(p.call_id.as_deref(), "callId")?;
            let phone = required_field(p.client_phone.as_deref(), "clientPhone")?;
            (
                format!(
                    "Brightcall Lead - {} - {}",
                    event.kind(),
                    p.call_type.as_deref().unwrap_or("UNKNOWN")
                ),
                placeholder_name(phone),
                phone,
                None,
                p.source.as_deref(),
                p.agent_email.as_deref(),
                p.started_at_ms(),
            )
        }
        Event::SmsEvent(_) | Event::AiTranscriptionSummary(_) => {
            return Err(AppError::Validation(format!(
                "{} events do not map to a lead",
                event.kind()
            )));
        }
        Event::SpeedToLead(p) => {
            let phone = required_field(p.phone(), "leadPhone")?;
            let name = p
                .lead_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| placeholder_name(phone));
            let email = p
                .lead_email
                .as_deref()
                .map(str::trim)
                .filter(|e| is_valid_email(e))
                .map(str::to_lowercase);
            (
                format!("Brightcall Lead - {} - {}", event.kind(), widget_label(p)),
                name,
                phone,
                email,
                p.source.as_deref(),
                p.agent_email.as_deref(),
                p.timestamp_ms,
            )
        }
    };

    let (source_id, collection_source_id) = select_sources(origin, config);
    let assignee =
        resolve_responsible_person(crm, agent_email, config.default_responsible_person_id).await;

    Ok(LeadDraft {
        title,
        name,
        phone: normalize_phone(raw_phone, config.default_phone_region),
        email,
        comments,
        source_id: source_id.to_string(),
        collection_source_id: collection_source_id.to_string(),
        assigned_by_id: assignee.user_id(),
        assignee_is_default: matches!(assignee, Assignee::Default(_)),
        external_call_id: event.call_id().map(str::to_string),
        call_time: call_time_ms.and_then(|ms| ts_to_iso(ms, tz)),
        return_customer: false,
    })
}

fn widget_label(p: &SpeedToLeadPayload) -> &str {
    p.widget_name
        .as_deref()
        .or(p.source.as_deref())
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .unwrap_or("Widget")
}

/// One `=== Title ===` block of the comment report.
struct Section {
    title: &'static str,
    lines: Vec<(&'static str, String)>,
}

impl Section {
    fn new(title: &'static str) -> Self {
        Self {
            title,
            lines: Vec::new(),
        }
    }

    fn line(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.lines.push((label, value.into()));
        self
    }
}

fn render(sections: Vec<Section>) -> String {
    sections
        .into_iter()
        .map(|section| {
            let mut block = format!("=== {} ===\n", section.title);
            for (label, value) in section.lines {
                block.push_str(&format!("{}: {}\n", label, value));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn text(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}

fn number(value: Option<i64>) -> String {
    value.unwrap_or(0).to_string()
}

fn call_information(event: &Event, p: &CallPayload) -> Section {
    Section::new("Call Information")
        .line("Call ID", text(p.call_id.as_deref()))
        .line("Call Type", text(p.call_type.as_deref()))
        .line("Event Type", event.kind().route())
}

fn client_details(p: &CallPayload) -> Section {
    Section::new("Client Details")
        .line("Client Phone", text(p.client_phone.as_deref()))
        .line("Line Number", text(p.line_number.as_deref()))
}

fn agent_details(p: &CallPayload, with_name: bool) -> Section {
    let section = Section::new("Agent Details")
        .line("Brightcall User ID", number(p.user_id))
        .line("Brightcall Agent ID", number(p.agent_id));
    let section = if with_name {
        section.line("Agent Name", text(p.agent_name.as_deref()))
    } else {
        section
    };
    section.line("Agent Email", text(p.agent_email.as_deref()))
}

/// Human-readable report stored in the lead's COMMENTS field.
///
/// Pure: the same event and zone always give the same text. Events without a
/// report template yield an empty string.
pub fn build_comment(event: &Event, tz: Tz) -> String {
    match event {
        Event::CallStarted(p) => render(vec![
            call_information(event, p),
            client_details(p),
            agent_details(p, true),
            Section::new("Call Timing").line("Call Start Time", human_or_na(p.timestamp_ms, tz)),
        ]),
        Event::CallRinging(p) | Event::CallAnswered(p) => render(vec![
            call_information(event, p),
            client_details(p),
            agent_details(p, false),
            Section::new("Call Timing").line("Call Start Time", human_or_na(p.timestamp_ms, tz)),
        ]),
        Event::CallEnded(p) => match p.direction() {
            Some(CallDirection::Incoming) => render(vec![
                call_information(event, p),
                client_details(p),
                Section::new("Agent Details").line("Brightcall User ID", number(p.user_id)),
                Section::new("Call Timing")
                    .line("Call Start Time", human_or_na(p.start_timestamp_ms, tz))
                    .line("Call End Time", human_or_na(p.end_timestamp_ms, tz)),
            ]),
            Some(CallDirection::Outgoing) => render(vec![
                call_information(event, p),
                client_details(p),
                agent_details(p, true),
                full_timing(p, tz),
            ]),
            None => String::new(),
        },
        Event::WebphoneSummary(p) => {
            let mut sections = vec![
                call_information(event, p),
                client_details(p),
                agent_details(p, true),
                full_timing(p, tz),
            ];
            if let Some(summary) = p.summary.as_deref().filter(|s| !s.trim().is_empty()) {
                sections.push(Section::new("Summary").line("Summary", summary.trim()));
            }
            render(sections)
        }
        Event::SpeedToLead(p) => render(vec![
            Section::new("Lead Information")
                .line("Lead Name", text(p.lead_name.as_deref()))
                .line("Lead Phone", text(p.lead_phone.as_deref()))
                .line("Lead Email", text(p.lead_email.as_deref()))
                .line("Source", text(p.source.as_deref()))
                .line("Widget", text(p.widget_name.as_deref())),
            Section::new("Capture Timing").line("Captured At", human_or_na(p.timestamp_ms, tz)),
        ]),
        Event::SmsEvent(_) | Event::AiTranscriptionSummary(_) => String::new(),
    }
}

fn full_timing(p: &CallPayload, tz: Tz) -> Section {
    Section::new("Call Timing")
        .line("Call Start Time", human_or_na(p.start_timestamp_ms, tz))
        .line("Call Answer Time", human_or_na(p.answer_timestamp_ms, tz))
        .line("Call End Time", human_or_na(p.end_timestamp_ms, tz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook_models::EventKind;

    fn dubai() -> Tz {
        "Asia/Dubai".parse().unwrap()
    }

    fn decode(kind: EventKind, json: &str) -> Event {
        Event::decode(kind, json.as_bytes()).unwrap()
    }

    #[test]
    fn test_timestamp_formats_fixed_zone() {
        assert_eq!(
            ts_to_iso(1_700_000_000_000, dubai()).as_deref(),
            Some("2023-11-15T02:13:20+04:00")
        );
        assert_eq!(
            ts_to_human(1_700_000_000_000, dubai()),
            "November 15, 2023 at 02:13 AM (+04)"
        );
    }

    #[test]
    fn test_timestamp_follows_configured_zone() {
        let utc: Tz = "UTC".parse().unwrap();
        assert_eq!(
            ts_to_iso(1_700_000_000_000, utc).as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
    }

    #[test]
    fn test_call_duration() {
        assert_eq!(call_duration_secs(1_700_000_065_000, 1_700_000_000_000), 65);
        assert_eq!(call_duration_secs(1_700_000_000_000, 1_700_000_000_000), 0);
        assert_eq!(call_duration_secs(1_700_000_000_999, 1_700_000_000_000), 0);
        assert_eq!(call_duration_secs(1_000, 5_000), 0);
    }

    #[test]
    fn test_call_started_comment() {
        let event = decode(
            EventKind::CallStarted,
            r#"{
                "callId": "c-1", "type": "OUTGOING", "eventType": "callStarted",
                "clientPhone": "+971501234567", "lineNumber": "800123",
                "userId": 11, "agentId": 22, "agentName": "Sara",
                "agentEmail": "sara@example.com", "timestampMs": 1700000000000
            }"#,
        );

        let expected = "=== Call Information ===\n\
            Call ID: c-1\n\
            Call Type: OUTGOING\n\
            Event Type: callStarted\n\
            \n\
            === Client Details ===\n\
            Client Phone: +971501234567\n\
            Line Number: 800123\n\
            \n\
            === Agent Details ===\n\
            Brightcall User ID: 11\n\
            Brightcall Agent ID: 22\n\
            Agent Name: Sara\n\
            Agent Email: sara@example.com\n\
            \n\
            === Call Timing ===\n\
            Call Start Time: November 15, 2023 at 02:13 AM (+04)\n";

        assert_eq!(build_comment(&event, dubai()), expected);
        assert_eq!(build_comment(&event, dubai()), build_comment(&event, dubai()));
    }

    #[test]
    fn test_agent_name_only_on_start_and_outgoing_end() {
        let body = r#"{"callId": "c-1", "type": "INCOMING", "clientPhone": "1", "agentName": "Sara"}"#;
        for kind in [EventKind::CallRinging, EventKind::CallAnswered, EventKind::CallEnded] {
            let comment = build_comment(&decode(kind, body), dubai());
            assert!(!comment.contains("Agent Name"), "{} leaked agent name", kind);
        }

        let outgoing = r#"{"callId": "c-1", "type": "OUTGOING", "clientPhone": "1", "agentName": "Sara"}"#;
        let comment = build_comment(&decode(EventKind::CallEnded, outgoing), dubai());
        assert!(comment.contains("Agent Name: Sara"));
        assert!(comment.contains("Call Answer Time: N/A"));
    }

    #[test]
    fn test_incoming_end_has_start_and_end_only() {
        let event = decode(
            EventKind::CallEnded,
            r#"{"callId": "c-2", "type": "INCOMING", "clientPhone": "1", "userId": 5,
                "startTimestampMs": 1700000000000, "endTimestampMs": 1700000060000}"#,
        );
        let comment = build_comment(&event, dubai());
        assert!(comment.contains("=== Agent Details ===\nBrightcall User ID: 5\n\n"));
        assert!(comment.contains("Call End Time: November 15, 2023 at 02:14 AM (+04)\n"));
        assert!(!comment.contains("Call Answer Time"));
    }

    #[test]
    fn test_events_without_template_have_empty_comment() {
        let sms = decode(EventKind::SmsEvent, r#"{"clientPhone": "1", "message": "hi"}"#);
        let ai = decode(EventKind::AiTranscriptionSummary, r#"{"callId": "c", "summary": "s"}"#);
        assert_eq!(build_comment(&sms, dubai()), "");
        assert_eq!(build_comment(&ai, dubai()), "");
    }

    fn draft(assignee: Assignee, comments: &str) -> LeadDraft {
        LeadDraft {
            title: "Brightcall Lead - callEnded - INCOMING".to_string(),
            name: placeholder_name("+971501234567"),
            phone: "+971501234567".to_string(),
            email: None,
            comments: comments.to_string(),
            source_id: "BRIGHTCALL".to_string(),
            collection_source_id: "77".to_string(),
            assigned_by_id: assignee.user_id(),
            assignee_is_default: matches!(assignee, Assignee::Default(_)),
            external_call_id: Some("c-1".to_string()),
            call_time: None,
            return_customer: true,
        }
    }

    #[test]
    fn test_update_fields_keep_earlier_assignment_and_report() {
        let codes = CrmFieldCodes::default();

        let fallback = draft(Assignee::Default(1), "");
        assert_eq!(fallback.to_crm_fields(&codes)["ASSIGNED_BY_ID"], json!(1));
        let update = fallback.to_update_fields(&codes);
        assert!(update.get("ASSIGNED_BY_ID").is_none());
        assert!(update.get("COMMENTS").is_none());
        assert_eq!(update["IS_RETURN_CUSTOMER"], json!("Y"));

        let resolved = draft(Assignee::Agent(42), "=== Call Information ===\n");
        let update = resolved.to_update_fields(&codes);
        assert_eq!(update["ASSIGNED_BY_ID"], json!(42));
        assert_eq!(update["COMMENTS"], json!("=== Call Information ===\n"));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone(" 050 123 4567 ", CountryId::AE), "+971501234567");
        assert_eq!(normalize_phone("+971501234567", CountryId::AE), "+971501234567");
        assert_eq!(normalize_phone("12", CountryId::AE), "12");
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("agent@example.com"));
        assert!(!is_valid_email("agent@"));
        assert!(!is_valid_email("agent example@example.com"));
        assert!(!is_valid_email(""));
    }
}
