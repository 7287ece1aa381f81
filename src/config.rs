use chrono_tz::Tz;
use std::path::PathBuf;
use phonenumber::country::Id as CountryId;
use url::Url;

use crate::write_policy::WritePolicy;

/// Bitrix custom field codes the bridge writes to on a lead.
#[derive(Debug, Clone)]
pub struct CrmFieldCodes {
    /// Holds the Brightcall call id; used for deduplication lookups.
    pub external_call_id: String,
    pub collection_source: String,
    pub call_time: String,
    pub return_customer: String,
}

impl Default for CrmFieldCodes {
    fn default() -> Self {
        Self {
            external_call_id: "UF_CRM_BRIGHTCALL_CALL_ID".to_string(),
            collection_source: "UF_CRM_1726164235378".to_string(),
            call_time: "UF_CRM_1726453884158".to_string(),
            return_customer: "IS_RETURN_CUSTOMER".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Inbound Bitrix webhook, e.g. `https://acme.bitrix24.com/rest/1/token/`.
    pub bitrix_webhook_url: Url,
    pub crm_timeout_secs: u64,
    pub brightcall_source_id: String,
    pub call_collection_source_id: String,
    pub facebook_source_id: String,
    pub facebook_collection_source_id: String,
    pub default_responsible_person_id: i64,
    pub display_timezone: Tz,
    pub default_phone_region: CountryId,
    pub write_policy: WritePolicy,
    pub crm_fields: CrmFieldCodes,
    /// Only directory local recording paths may be read from. `None` means
    /// recordings are fetched over http(s) only.
    pub recordings_dir: Option<PathBuf>,
    pub max_recording_bytes: usize,
}

fn required(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    Ok(value.trim().to_string())
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let brightcall_source_id = required("BRIGHTCALL_SOURCE_ID")?;
        let call_collection_source_id = required("CALL_COLLECTION_SOURCE_ID")?;
        let defaults = CrmFieldCodes::default();

        let config = Self {
            port: optional("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            bitrix_webhook_url: required("BITRIX_WEBHOOK_URL").and_then(|raw| {
                if !raw.starts_with("http://") && !raw.starts_with("https://") {
                    anyhow::bail!("BITRIX_WEBHOOK_URL must start with http:// or https://");
                }
                // Method names are joined onto this URL, so it has to end in '/'.
                let normalized = if raw.ends_with('/') {
                    raw
                } else {
                    format!("{}/", raw)
                };
                Url::parse(&normalized)
                    .map_err(|e| anyhow::anyhow!("BITRIX_WEBHOOK_URL is not a valid URL: {}", e))
            })?,
            crm_timeout_secs: optional("CRM_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CRM_TIMEOUT_SECS must be a whole number"))?,
            facebook_source_id: optional("FACEBOOK_SOURCE_ID")
                .unwrap_or_else(|| brightcall_source_id.clone()),
            facebook_collection_source_id: optional("FACEBOOK_COLLECTION_SOURCE_ID")
                .unwrap_or_else(|| call_collection_source_id.clone()),
            brightcall_source_id,
            call_collection_source_id,
            default_responsible_person_id: required("DEFAULT_RESPONSIBLE_PERSON_ID")?
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_RESPONSIBLE_PERSON_ID must be an integer"))?,
            display_timezone: optional("DISPLAY_TIMEZONE")
                .unwrap_or_else(|| "Asia/Dubai".to_string())
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("DISPLAY_TIMEZONE is not an IANA zone: {}", e))?,
            default_phone_region: optional("DEFAULT_PHONE_REGION")
                .unwrap_or_else(|| "AE".to_string())
                .to_ascii_uppercase()
                .parse::<CountryId>()
                .map_err(|_| anyhow::anyhow!("DEFAULT_PHONE_REGION must be an ISO 3166 code"))?,
            write_policy: optional("CRM_WRITE_POLICY")
                .unwrap_or_else(|| "v2".to_string())
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            crm_fields: CrmFieldCodes {
                external_call_id: optional("LEAD_EXTERNAL_ID_FIELD")
                    .unwrap_or(defaults.external_call_id),
                collection_source: optional("LEAD_COLLECTION_SOURCE_FIELD")
                    .unwrap_or(defaults.collection_source),
                call_time: optional("LEAD_CALL_TIME_FIELD").unwrap_or(defaults.call_time),
                return_customer: optional("LEAD_RETURN_CUSTOMER_FIELD")
                    .unwrap_or(defaults.return_customer),
            },
            recordings_dir: optional("RECORDINGS_DIR").map(PathBuf::from),
            max_recording_bytes: optional("MAX_RECORDING_BYTES")
                .unwrap_or_else(|| (50 * 1024 * 1024).to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_RECORDING_BYTES must be a whole number"))?,
        };

        // Log successful configuration load (without the webhook token)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Bitrix host: {:?}", config.bitrix_webhook_url.host_str());
        tracing::debug!("Display timezone: {}", config.display_timezone);
        tracing::info!("CRM write policy: {}", config.write_policy);
        tracing::debug!("Local recordings directory: {:?}", config.recordings_dir);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
