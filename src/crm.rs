//! CRM port.
//!
//! The reconciliation core only talks to the CRM through [`CrmClient`].
//! [`crate::bitrix_client::BitrixClient`] is the production implementation.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::AppError;

pub type LeadId = i64;
pub type UserId = i64;

/// Lead field map in the CRM's own field codes (`TITLE`, `PHONE`, `UF_CRM_*`...).
pub type LeadFields = Map<String, Value>;

/// `telephony.externalcall.register` parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CallRegistration {
    pub user_id: UserId,
    pub phone_number: String,
    pub call_start_date: String,
    /// 1 = outbound, 2 = inbound.
    #[serde(rename = "TYPE")]
    pub call_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<String>,
    /// Always 0: the lead already exists, Bitrix must not create another one.
    pub crm_create: u8,
    pub crm_entity_type: String,
    pub crm_entity_id: LeadId,
    pub show: u8,
}

/// `telephony.externalcall.finish` parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CallFinish {
    pub call_id: String,
    pub user_id: UserId,
    pub duration: i64,
    pub status_code: u16,
    pub add_to_chat: u8,
}

/// `telephony.externalcall.attachRecord` parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RecordingUpload {
    pub call_id: String,
    pub filename: String,
    /// Base64 of the recording bytes; empty when the recording could not be read.
    pub file_content: String,
}

/// Remote operations the bridge needs from the CRM.
///
/// Every method may fail with [`AppError::CrmError`] on transport failure or
/// remote rejection. Callers never retry.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Create a lead, returning its id when the CRM reports one.
    async fn create_lead(&self, fields: &LeadFields) -> Result<Option<LeadId>, AppError>;

    /// Update an existing lead. `false` means the CRM refused the update.
    async fn update_lead(&self, id: LeadId, fields: &LeadFields) -> Result<bool, AppError>;

    /// Exact match on the external call id custom field.
    async fn find_lead_by_external_id(&self, external_id: &str)
        -> Result<Option<LeadId>, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, AppError>;

    /// Returns the CRM call handle, if one was issued.
    async fn register_call(&self, fields: &CallRegistration) -> Result<Option<String>, AppError>;

    async fn finish_call(&self, fields: &CallFinish) -> Result<(), AppError>;

    async fn attach_recording(&self, fields: &RecordingUpload) -> Result<(), AppError>;
}
