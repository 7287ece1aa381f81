use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::circuit_breaker::{create_crm_circuit_breaker, CrmCircuitBreaker};
use crate::config::{Config, CrmFieldCodes};
use crate::crm::{
    CallFinish, CallRegistration, CrmClient, LeadFields, LeadId, RecordingUpload, UserId,
};
use crate::errors::AppError;

/// How a single REST call failed. Only transport failures feed the breaker.
#[derive(Debug)]
enum CallFailure {
    Transport(String),
    Remote(String),
}

impl From<CallFailure> for AppError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Transport(msg) | CallFailure::Remote(msg) => AppError::CrmError(msg),
        }
    }
}

/// Client for the Bitrix24 REST API through an inbound webhook URL.
///
/// Every method is a `POST <webhook>/<method>.json` with a JSON body. Bitrix
/// answers `{"result": ...}` on success and `{"error", "error_description"}`
/// otherwise.
#[derive(Clone)]
pub struct BitrixClient {
    client: reqwest::Client,
    webhook_url: Url,
    fields: CrmFieldCodes,
    breaker: CrmCircuitBreaker,
}

impl BitrixClient {
    /// Creates a new `BitrixClient`.
    ///
    /// # Arguments
    ///
    /// * `webhook_url` - Inbound webhook base, ending in `/`.
    /// * `timeout` - Per-request timeout.
    /// * `fields` - Custom field codes used for lookups.
    pub fn new(
        webhook_url: Url,
        timeout: Duration,
        fields: CrmFieldCodes,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create Bitrix client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url,
            fields,
            breaker: create_crm_circuit_breaker(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.bitrix_webhook_url.clone(),
            Duration::from_secs(config.crm_timeout_secs),
            config.crm_fields.clone(),
        )
    }

    /// Calls a REST method and returns its `result` member.
    async fn call<P: Serialize + Sync>(&self, method: &str, params: &P) -> Result<Value, AppError> {
        let outcome = self
            .breaker
            .call_with(
                |failure: &CallFailure| matches!(failure, CallFailure::Transport(_)),
                self.send(method, params),
            )
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(failsafe::Error::Inner(failure)) => {
                tracing::error!("Bitrix {} failed: {:?}", method, failure);
                Err(failure.into())
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Bitrix circuit open, {} not attempted", method);
                Err(AppError::CrmError(format!(
                    "{} rejected: CRM circuit breaker is open",
                    method
                )))
            }
        }
    }

    async fn send<P: Serialize + Sync>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Value, CallFailure> {
        let url = self
            .webhook_url
            .join(&format!("{}.json", method))
            .map_err(|e| CallFailure::Transport(format!("Invalid Bitrix URL: {}", e)))?;

        tracing::debug!("Calling Bitrix method {}", method);

        let response = self
            .client
            .post(url)
            .json(params)
            .send()
            .await
            .map_err(|e| CallFailure::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallFailure::Transport(format!("{} body read failed: {}", method, e)))?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CallFailure::Transport(format!(
                "{} returned {}: {}",
                method, status, text
            )));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            CallFailure::Remote(format!("{} returned non-JSON ({}): {}", method, status, e))
        })?;

        if let Some(error) = body.get("error") {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or("");
            return Err(CallFailure::Remote(format!(
                "{} returned {} {}: {}",
                method, status, error, description
            )));
        }

        if !status.is_success() {
            return Err(CallFailure::Remote(format!(
                "{} returned {}: {}",
                method, status, text
            )));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Bitrix returns ids either as numbers or numeric strings.
pub fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CrmClient for BitrixClient {
    async fn create_lead(&self, fields: &LeadFields) -> Result<Option<LeadId>, AppError> {
        let params = json!({
            "fields": fields,
            "params": { "REGISTER_SONET_EVENT": "Y" }
        });
        let result = self.call("crm.lead.add", &params).await?;
        let lead_id = value_as_id(&result);
        if lead_id.is_none() {
            tracing::warn!("Unexpected crm.lead.add result: {:?}", result);
        }
        Ok(lead_id)
    }

    async fn update_lead(&self, id: LeadId, fields: &LeadFields) -> Result<bool, AppError> {
        let params = json!({
            "id": id,
            "fields": fields,
            "params": { "REGISTER_SONET_EVENT": "Y" }
        });
        let result = self.call("crm.lead.update", &params).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn find_lead_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LeadId>, AppError> {
        let mut filter = serde_json::Map::new();
        filter.insert(self.fields.external_call_id.clone(), json!(external_id));
        let params = json!({
            "filter": filter,
            "select": ["ID"],
            "order": { "ID": "ASC" }
        });

        let result = self.call("crm.lead.list", &params).await?;
        Ok(result
            .as_array()
            .and_then(|leads| leads.first())
            .and_then(|lead| lead.get("ID"))
            .and_then(value_as_id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>, AppError> {
        let params = json!({ "filter": { "EMAIL": email } });
        let result = self.call("user.get", &params).await?;
        Ok(result
            .as_array()
            .and_then(|users| users.first())
            .and_then(|user| user.get("ID"))
            .and_then(value_as_id))
    }

    async fn register_call(&self, fields: &CallRegistration) -> Result<Option<String>, AppError> {
        let result = self.call("telephony.externalcall.register", fields).await?;
        Ok(result
            .get("CALL_ID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }

    async fn finish_call(&self, fields: &CallFinish) -> Result<(), AppError> {
        self.call("telephony.externalcall.finish", fields).await?;
        Ok(())
    }

    async fn attach_recording(&self, fields: &RecordingUpload) -> Result<(), AppError> {
        self.call("telephony.externalcall.attachRecord", fields).await?;
        Ok(())
    }
}
