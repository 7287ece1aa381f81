//! Brightcall → Bitrix24 webhook bridge.
//!
//! Receives Brightcall call-telemetry webhooks and turns each event into
//! lead create/update calls and telephony records in Bitrix24.
//!
//! # Modules
//!
//! - `api`: Route table.
//! - `bitrix_client`: Bitrix24 REST client.
//! - `circuit_breaker`: Circuit breaker guarding the CRM transport.
//! - `config`: Configuration management.
//! - `crm`: CRM port used by the core.
//! - `errors`: Error handling types.
//! - `field_mapper`: Event to lead draft and comment mapping.
//! - `handlers`: Shared state and health endpoint.
//! - `reconciler`: Lead create-vs-update by external call id.
//! - `recording`: Best-effort call recording reads.
//! - `telemetry`: Register/finish/attach sequence for finished calls.
//! - `webhook_handler`: Brightcall webhook router.
//! - `webhook_models`: Webhook payload models.
//! - `write_policy`: Which events write to the CRM.

pub mod api;

pub mod bitrix_client;
pub mod circuit_breaker;
pub mod config;
pub mod crm;
pub mod errors;
pub mod field_mapper;
pub mod handlers;
pub mod reconciler;
pub mod recording;
pub mod telemetry;
pub mod webhook_handler;
pub mod webhook_models;
pub mod write_policy;
