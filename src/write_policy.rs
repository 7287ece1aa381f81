//! Which webhook events write to the CRM.
//!
//! Brightcall events were wired to Bitrix incrementally: the first release
//! only created leads on `callStarted`/`callRinging` and acknowledged the
//! rest. The table is versioned so a deployment can pin the behavior it was
//! validated against.

use std::fmt;
use std::str::FromStr;

use crate::webhook_models::EventKind;

/// What the router does with an event after decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Log and reply 200, no CRM call.
    Acknowledge,
    /// Create or update the lead keyed by the call id.
    Reconcile,
    /// Reconcile, then register the finished call and attach its recording.
    ReconcileAndRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// First release: only start/ringing events produce leads.
    V1,
    /// Current: every call event reconciles, terminal events record telemetry.
    #[default]
    V2,
}

impl WritePolicy {
    pub fn action(self, kind: EventKind) -> WriteAction {
        use EventKind::*;
        use WriteAction::*;

        match self {
            WritePolicy::V1 => match kind {
                CallStarted | CallRinging => Reconcile,
                CallAnswered | CallEnded | SmsEvent | WebphoneSummary
                | AiTranscriptionSummary | SpeedToLead => Acknowledge,
            },
            WritePolicy::V2 => match kind {
                CallStarted | CallRinging | CallAnswered | SpeedToLead => Reconcile,
                CallEnded | WebphoneSummary => ReconcileAndRecord,
                SmsEvent | AiTranscriptionSummary => Acknowledge,
            },
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(WritePolicy::V1),
            "v2" | "2" => Ok(WritePolicy::V2),
            other => Err(format!("unknown CRM write policy '{}'", other)),
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::V1 => write!(f, "v1"),
            WritePolicy::V2 => write!(f, "v2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_only_creates_on_start_and_ringing() {
        let writes: Vec<EventKind> = EventKind::ALL
            .iter()
            .copied()
            .filter(|k| WritePolicy::V1.action(*k) != WriteAction::Acknowledge)
            .collect();
        assert_eq!(writes, vec![EventKind::CallStarted, EventKind::CallRinging]);
    }

    #[test]
    fn test_v2_records_terminal_events() {
        assert_eq!(
            WritePolicy::V2.action(EventKind::CallEnded),
            WriteAction::ReconcileAndRecord
        );
        assert_eq!(
            WritePolicy::V2.action(EventKind::WebphoneSummary),
            WriteAction::ReconcileAndRecord
        );
        assert_eq!(
            WritePolicy::V2.action(EventKind::SmsEvent),
            WriteAction::Acknowledge
        );
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("V1".parse::<WritePolicy>().unwrap(), WritePolicy::V1);
        assert_eq!(" v2 ".parse::<WritePolicy>().unwrap(), WritePolicy::V2);
        assert!("v3".parse::<WritePolicy>().is_err());
    }
}
