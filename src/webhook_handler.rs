use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, Uri},
};
use std::sync::Arc;

use crate::errors::{AppError, ResultExt};
use crate::field_mapper::build_lead_draft;
use crate::handlers::AppState;
use crate::reconciler::{LeadOutcome, LeadReconciler};
use crate::telemetry::{CallTelemetryRecorder, TelemetryOutcome};
use crate::webhook_models::{Event, EventKind, WebhookReply};
use crate::write_policy::WriteAction;

/// Brightcall webhook endpoint: `/webhook/:route`, mounted for every method
/// so that non-POST requests get the JSON 405 instead of axum's default.
pub async fn brightcall_webhook(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(route): Path<String>,
    body: Bytes,
) -> WebhookReply {
    handle(&state, &method, &route, &body).await
}

/// Any path outside the route table, e.g. `/webhook/` or `/webhook/a/b`.
pub async fn unknown_path(method: Method, uri: Uri) -> WebhookReply {
    let err = AppError::NotFound(format!("no route for {}", uri.path()));
    tracing::warn!("Rejected {} {}: {}", method, uri.path(), err);
    WebhookReply::from_error(&err)
}

/// Handle one webhook request end to end.
///
/// This is the only place a reply is produced. Validation failures keep
/// their 4xx status; anything else becomes a generic 500.
pub async fn handle(state: &AppState, method: &Method, route: &str, body: &[u8]) -> WebhookReply {
    tracing::info!("Received Brightcall webhook: {} /webhook/{}", method, route);

    match dispatch(state, method, route, body).await {
        Ok(message) => WebhookReply::ok(message),
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("Error processing request for route {}: {}", route, e);
            } else {
                tracing::warn!("Rejected webhook for route {}: {}", route, e);
            }
            WebhookReply::from_error(&e)
        }
    }
}

async fn dispatch(
    state: &AppState,
    method: &Method,
    route: &str,
    body: &[u8],
) -> Result<String, AppError> {
    if *method != Method::POST {
        return Err(AppError::MethodNotAllowed(method.to_string()));
    }

    let kind = EventKind::from_route(route)
        .ok_or_else(|| AppError::NotFound(format!("unknown webhook route '{}'", route)))?;

    let event = Event::decode(kind, body).with_context(|| format!("decoding {} payload", kind))?;

    tracing::info!(
        "Webhook {} payload: {}",
        kind.log_label(),
        String::from_utf8_lossy(body)
    );

    process_event(state, &event).await
}

/// Apply the configured write policy to a decoded event and return the
/// success message.
pub async fn process_event(state: &AppState, event: &Event) -> Result<String, AppError> {
    let config = state.config.as_ref();
    let action = config.write_policy.action(event.kind());

    let outcome = match action {
        WriteAction::Acknowledge => None,
        WriteAction::Reconcile | WriteAction::ReconcileAndRecord => {
            let mut draft = build_lead_draft(event, config, state.crm.as_ref())
                .await
                .with_context(|| format!("building lead draft for {}", event.kind()))?;

            let outcome = LeadReconciler::new(state.crm.as_ref(), &config.crm_fields)
                .reconcile(&mut draft, event.call_id())
                .await
                .with_context(|| format!("reconciling lead for {}", event.kind()))?;

            if action == WriteAction::ReconcileAndRecord
                && event.is_terminal()
                && event.recording_reference().is_some()
            {
                let telemetry = CallTelemetryRecorder::new(
                    state.crm.as_ref(),
                    state.recordings.as_ref(),
                    config.display_timezone,
                )
                .record_completed_call(&draft, event, outcome.lead_id)
                .await;

                if let TelemetryOutcome::RecordAttached { call_handle } = &telemetry {
                    tracing::debug!("Telephony call {} attached to lead {}", call_handle, outcome.lead_id);
                } else {
                    tracing::debug!("Telephony sequence for lead {}: {:?}", outcome.lead_id, telemetry);
                }
            }

            Some(outcome)
        }
    };

    Ok(success_message(event.kind(), outcome))
}

fn success_message(kind: EventKind, outcome: Option<LeadOutcome>) -> String {
    let verb = |o: &LeadOutcome| if o.created { "created" } else { "updated" };

    if kind == EventKind::CallStarted {
        if let Some(o) = outcome {
            return format!(
                "Call started data processed successfully and lead {} with ID: {}",
                verb(&o),
                o.lead_id
            );
        }
    }

    let base = match kind {
        EventKind::CallStarted => "Call started data processed successfully",
        EventKind::CallRinging => "Call ringing data processed successfully",
        EventKind::CallAnswered => "Call answered data processed successfully",
        EventKind::CallEnded => "Call ended data processed successfully",
        EventKind::SmsEvent => "SMS event data processed successfully",
        EventKind::WebphoneSummary => "Webphone summary data processed successfully",
        EventKind::AiTranscriptionSummary => {
            "AI transcription summary data processed successfully"
        }
        EventKind::SpeedToLead => "Speed to lead data processed successfully",
    };

    match outcome {
        Some(o) => format!("{} (lead {} with ID: {})", base, verb(&o), o.lead_id),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_started_message_carries_lead_id() {
        let message = success_message(
            EventKind::CallStarted,
            Some(LeadOutcome {
                lead_id: 321,
                created: true,
            }),
        );
        assert_eq!(
            message,
            "Call started data processed successfully and lead created with ID: 321"
        );
    }

    #[test]
    fn test_acknowledged_message_has_no_lead() {
        assert_eq!(
            success_message(EventKind::SmsEvent, None),
            "SMS event data processed successfully"
        );
        assert_eq!(
            success_message(
                EventKind::CallEnded,
                Some(LeadOutcome {
                    lead_id: 9,
                    created: false
                })
            ),
            "Call ended data processed successfully (lead updated with ID: 9)"
        );
    }
}
