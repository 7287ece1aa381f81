//! Telephony registration for finished calls.
//!
//! After the lead exists, a terminal call event is mirrored into Bitrix
//! telephony: register the call against the lead, finish it with its
//! duration, then attach the recording. The sequence is linear with no
//! retries, and nothing in it can fail the webhook request.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono_tz::Tz;

use crate::crm::{CallFinish, CallRegistration, CrmClient, LeadId, RecordingUpload};
use crate::field_mapper::{call_duration_secs, ts_to_iso, LeadDraft};
use crate::recording::{recording_extension, RecordingStore};
use crate::webhook_models::{CallDirection, Event};

const STATUS_SUCCESS: u16 = 200;

/// Where the register → finish → attach sequence ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// Event is not terminal or has no recording reference.
    Skipped,
    /// Register returned no call handle; finish and attach were not attempted.
    NoCallHandle,
    /// A step failed; later steps were not attempted.
    Failed { stage: TelemetryStage, reason: String },
    RecordAttached { call_handle: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryStage {
    Register,
    Finish,
    Attach,
}

/// State of one finished call while it is being registered.
struct TelemetrySession {
    call_handle: String,
    lead_id: LeadId,
    duration_secs: i64,
    recording: Vec<u8>,
}

pub struct CallTelemetryRecorder<'a> {
    crm: &'a dyn CrmClient,
    recordings: &'a dyn RecordingStore,
    tz: Tz,
}

impl<'a> CallTelemetryRecorder<'a> {
    pub fn new(crm: &'a dyn CrmClient, recordings: &'a dyn RecordingStore, tz: Tz) -> Self {
        Self {
            crm,
            recordings,
            tz,
        }
    }

    pub async fn record_completed_call(
        &self,
        draft: &LeadDraft,
        event: &Event,
        lead_id: LeadId,
    ) -> TelemetryOutcome {
        let (Some(call), Some(reference)) = (event.call(), event.recording_reference()) else {
            return TelemetryOutcome::Skipped;
        };
        if !event.is_terminal() {
            return TelemetryOutcome::Skipped;
        }

        let call_id = call.call_id.as_deref().unwrap_or_default();
        let direction = call.direction().unwrap_or(CallDirection::Incoming);
        let start_ms = call.started_at_ms();

        let registration = CallRegistration {
            user_id: draft.assigned_by_id,
            phone_number: draft.phone.clone(),
            call_start_date: start_ms
                .and_then(|ms| ts_to_iso(ms, self.tz))
                .or_else(|| draft.call_time.clone())
                .unwrap_or_default(),
            call_type: direction.telephony_code(),
            line_number: call.line_number.clone(),
            crm_create: 0,
            crm_entity_type: "LEAD".to_string(),
            crm_entity_id: lead_id,
            show: 0,
        };

        let call_handle = match self.crm.register_call(&registration).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::warn!("Call {} registered without a handle, skipping finish", call_id);
                return TelemetryOutcome::NoCallHandle;
            }
            Err(e) => return failed(TelemetryStage::Register, call_id, e.to_string()),
        };

        let recording = match self.recordings.fetch(reference).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Recording for call {} degraded to empty: {}", call_id, e);
                Vec::new()
            }
        };

        let session = TelemetrySession {
            call_handle,
            lead_id,
            duration_secs: match (call.end_timestamp_ms, start_ms) {
                (Some(end), Some(start)) => call_duration_secs(end, start),
                _ => 0,
            },
            recording,
        };

        let finish = CallFinish {
            call_id: session.call_handle.clone(),
            user_id: draft.assigned_by_id,
            duration: session.duration_secs,
            status_code: STATUS_SUCCESS,
            add_to_chat: 0,
        };
        if let Err(e) = self.crm.finish_call(&finish).await {
            return failed(TelemetryStage::Finish, call_id, e.to_string());
        }

        let upload = RecordingUpload {
            call_id: session.call_handle.clone(),
            filename: format!(
                "{}-{}.{}",
                call_id,
                uuid::Uuid::new_v4().simple(),
                recording_extension(reference)
            ),
            file_content: BASE64.encode(&session.recording),
        };
        if let Err(e) = self.crm.attach_recording(&upload).await {
            return failed(TelemetryStage::Attach, call_id, e.to_string());
        }

        tracing::info!(
            "Call {} recorded against lead {} ({}s, {} bytes)",
            call_id,
            session.lead_id,
            session.duration_secs,
            session.recording.len()
        );

        TelemetryOutcome::RecordAttached {
            call_handle: session.call_handle,
        }
    }
}

fn failed(stage: TelemetryStage, call_id: &str, reason: String) -> TelemetryOutcome {
    tracing::error!("Telephony {:?} failed for call {}: {}", stage, call_id, reason);
    TelemetryOutcome::Failed { stage, reason }
}
