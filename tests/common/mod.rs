//! Shared test doubles: an in-memory CRM and recording store.
#![allow(dead_code)]

use async_trait::async_trait;
use brightcall_bitrix_bridge::config::{Config, CrmFieldCodes};
use brightcall_bitrix_bridge::crm::{
    CallFinish, CallRegistration, CrmClient, LeadFields, LeadId, RecordingUpload, UserId,
};
use brightcall_bitrix_bridge::errors::AppError;
use brightcall_bitrix_bridge::handlers::AppState;
use brightcall_bitrix_bridge::recording::{RecordingError, RecordingStore};
use brightcall_bitrix_bridge::write_policy::WritePolicy;
use phonenumber::country::Id as CountryId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

pub const DEFAULT_USER: UserId = 1;

/// Helper function to create test config
pub fn test_config() -> Config {
    Config {
        port: 0,
        bitrix_webhook_url: Url::parse("https://example.bitrix24.com/rest/1/token/").unwrap(),
        crm_timeout_secs: 5,
        brightcall_source_id: "BRIGHTCALL".to_string(),
        call_collection_source_id: "77".to_string(),
        facebook_source_id: "FACEBOOK".to_string(),
        facebook_collection_source_id: "88".to_string(),
        default_responsible_person_id: DEFAULT_USER,
        display_timezone: chrono_tz::Asia::Dubai,
        default_phone_region: CountryId::AE,
        write_policy: WritePolicy::V2,
        crm_fields: CrmFieldCodes::default(),
        recordings_dir: None,
        max_recording_bytes: 1024 * 1024,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrmCall {
    CreateLead(LeadFields),
    UpdateLead(LeadId, LeadFields),
    FindLead(String),
    FindUser(String),
    RegisterCall(CallRegistration),
    FinishCall(CallFinish),
    AttachRecording(RecordingUpload),
}

pub struct MockCrm {
    calls: Mutex<Vec<CrmCall>>,
    leads: Mutex<HashMap<String, LeadId>>,
    users: HashMap<String, UserId>,
    next_id: AtomicI64,
    call_handle: Option<String>,
    create_returns_id: bool,
    fail_user_lookup: bool,
    fail_finish: bool,
}

impl MockCrm {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            leads: Mutex::new(HashMap::new()),
            users: HashMap::new(),
            next_id: AtomicI64::new(100),
            call_handle: Some("externalCall.abc123".to_string()),
            create_returns_id: true,
            fail_user_lookup: false,
            fail_finish: false,
        }
    }

    pub fn with_user(mut self, email: &str, id: UserId) -> Self {
        self.users.insert(email.to_string(), id);
        self
    }

    pub fn with_existing_lead(self, call_id: &str, id: LeadId) -> Self {
        self.leads.lock().unwrap().insert(call_id.to_string(), id);
        self
    }

    pub fn without_call_handle(mut self) -> Self {
        self.call_handle = None;
        self
    }

    pub fn with_create_id_missing(mut self) -> Self {
        self.create_returns_id = false;
        self
    }

    pub fn with_failing_user_lookup(mut self) -> Self {
        self.fail_user_lookup = true;
        self
    }

    pub fn with_failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn calls(&self) -> Vec<CrmCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&CrmCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, CrmCall::CreateLead(_)))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, CrmCall::UpdateLead(..)))
    }

    /// Lead-writing and telephony calls, i.e. everything except lookups.
    pub fn writes(&self) -> usize {
        self.count(|c| !matches!(c, CrmCall::FindLead(_) | CrmCall::FindUser(_)))
    }

    fn record(&self, call: CrmCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CrmClient for MockCrm {
    async fn create_lead(&self, fields: &LeadFields) -> Result<Option<LeadId>, AppError> {
        self.record(CrmCall::CreateLead(fields.clone()));
        if !self.create_returns_id {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = CrmFieldCodes::default().external_call_id;
        if let Some(call_id) = fields.get(&key).and_then(|v| v.as_str()) {
            self.leads.lock().unwrap().insert(call_id.to_string(), id);
        }
        Ok(Some(id))
    }

    async fn update_lead(&self, id: LeadId, fields: &LeadFields) -> Result<bool, AppError> {
        self.record(CrmCall::UpdateLead(id, fields.clone()));
        Ok(true)
    }

    async fn find_lead_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LeadId>, AppError> {
        self.record(CrmCall::FindLead(external_id.to_string()));
        Ok(self.leads.lock().unwrap().get(external_id).copied())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, AppError> {
        self.record(CrmCall::FindUser(email.to_string()));
        if self.fail_user_lookup {
            return Err(AppError::CrmError("user.get timed out".to_string()));
        }
        Ok(self.users.get(email).copied())
    }

    async fn register_call(&self, fields: &CallRegistration) -> Result<Option<String>, AppError> {
        self.record(CrmCall::RegisterCall(fields.clone()));
        Ok(self.call_handle.clone())
    }

    async fn finish_call(&self, fields: &CallFinish) -> Result<(), AppError> {
        self.record(CrmCall::FinishCall(fields.clone()));
        if self.fail_finish {
            return Err(AppError::CrmError("CALL_NOT_FOUND".to_string()));
        }
        Ok(())
    }

    async fn attach_recording(&self, fields: &RecordingUpload) -> Result<(), AppError> {
        self.record(CrmCall::AttachRecording(fields.clone()));
        Ok(())
    }
}

/// Recording store returning fixed bytes, or failing every read.
pub struct MockRecordings {
    bytes: Option<Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

impl MockRecordings {
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: Some(bytes.to_vec()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            bytes: None,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingStore for MockRecordings {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, RecordingError> {
        self.fetched.lock().unwrap().push(reference.to_string());
        self.bytes
            .clone()
            .ok_or_else(|| RecordingError::Unavailable(format!("{} returned 404", reference)))
    }
}

pub fn app_state(crm: &Arc<MockCrm>, recordings: &Arc<MockRecordings>, config: Config) -> AppState {
    AppState {
        config: Arc::new(config),
        crm: crm.clone(),
        recordings: recordings.clone(),
    }
}

pub fn call_started_body(call_id: &str) -> String {
    serde_json::json!({
        "eventType": "callStarted",
        "type": "OUTGOING",
        "callId": call_id,
        "clientPhone": "+971501234567",
        "lineNumber": "800123",
        "userId": 11,
        "agentId": 22,
        "agentName": "Sara",
        "agentEmail": "sara@example.com",
        "timestampMs": 1700000000000i64
    })
    .to_string()
}

pub fn call_ended_body(call_id: &str, recording: Option<&str>) -> String {
    let mut body = serde_json::json!({
        "eventType": "callEnded",
        "type": "OUTGOING",
        "callId": call_id,
        "clientPhone": "+971501234567",
        "lineNumber": "800123",
        "userId": 11,
        "agentId": 22,
        "agentName": "Sara",
        "agentEmail": "sara@example.com",
        "startTimestampMs": 1700000000000i64,
        "answerTimestampMs": 1700000005000i64,
        "endTimestampMs": 1700000065000i64
    });
    if let Some(reference) = recording {
        body["recordingUrl"] = serde_json::json!(reference);
    }
    body.to_string()
}
