use crate::config::CrmFieldCodes;
use crate::crm::{CrmClient, LeadId};
use crate::errors::AppError;
use crate::field_mapper::LeadDraft;

/// Result of reconciling one draft against the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadOutcome {
    pub lead_id: LeadId,
    pub created: bool,
}

/// Decides create-vs-update for lead drafts, keyed by the external call id.
///
/// Every event carrying a call id runs the same lookup-then-write step, so the
/// outcome does not depend on the order Brightcall delivers events in. Two
/// concurrent events for a brand-new call id can still both miss the lookup
/// and create two leads; nothing here serialises requests.
pub struct LeadReconciler<'a> {
    crm: &'a dyn CrmClient,
    fields: &'a CrmFieldCodes,
}

impl<'a> LeadReconciler<'a> {
    pub fn new(crm: &'a dyn CrmClient, fields: &'a CrmFieldCodes) -> Self {
        Self { crm, fields }
    }

    pub async fn reconcile(
        &self,
        draft: &mut LeadDraft,
        external_call_id: Option<&str>,
    ) -> Result<LeadOutcome, AppError> {
        let existing = match external_call_id {
            Some(call_id) => self.crm.find_lead_by_external_id(call_id).await?,
            None => None,
        };

        match existing {
            Some(lead_id) => {
                draft.return_customer = true;
                let fields = draft.to_update_fields(self.fields);
                if !self.crm.update_lead(lead_id, &fields).await? {
                    return Err(AppError::CrmError(format!(
                        "crm.lead.update refused lead {}",
                        lead_id
                    )));
                }
                tracing::info!(
                    "Updated lead {} for call {}",
                    lead_id,
                    external_call_id.unwrap_or_default()
                );
                Ok(LeadOutcome {
                    lead_id,
                    created: false,
                })
            }
            None => {
                let fields = draft.to_crm_fields(self.fields);
                let lead_id = self.crm.create_lead(&fields).await?.ok_or_else(|| {
                    AppError::CrmError("crm.lead.add returned no lead id".to_string())
                })?;
                tracing::info!(
                    "Created lead {} for call {}",
                    lead_id,
                    external_call_id.unwrap_or("<none>")
                );
                Ok(LeadOutcome {
                    lead_id,
                    created: true,
                })
            }
        }
    }
}
