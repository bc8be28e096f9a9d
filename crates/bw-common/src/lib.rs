use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod logging;

// ============================================================================
// Recipient Lifecycle
// ============================================================================

/// Delivery status of a single recipient within a send job.
///
/// Statuses advance monotonically along Pending -> Sent -> Delivered -> Read.
/// Failed is terminal and reachable only from Pending. These are stored as
/// integer codes in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientStatus {
    /// Snapshot row created, nothing sent yet (code: 0)
    Pending,
    /// Accepted by the transport (code: 1)
    Sent,
    /// Transport confirmed delivery (code: 2)
    Delivered,
    /// Transport confirmed the recipient read the message (code: 3)
    Read,
    /// Send attempt failed, terminal (code: 4)
    Failed,
}

impl RecipientStatus {
    /// Integer code for database storage
    pub fn code(&self) -> i32 {
        match self {
            RecipientStatus::Pending => 0,
            RecipientStatus::Sent => 1,
            RecipientStatus::Delivered => 2,
            RecipientStatus::Read => 3,
            RecipientStatus::Failed => 4,
        }
    }

    /// Create status from integer code, defaulting to Pending for unknown codes
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => RecipientStatus::Sent,
            2 => RecipientStatus::Delivered,
            3 => RecipientStatus::Read,
            4 => RecipientStatus::Failed,
            _ => RecipientStatus::Pending,
        }
    }

    /// Check if this status accepts no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecipientStatus::Read | RecipientStatus::Failed)
    }

    /// Whether a transition from `self` to `next` moves strictly forward on
    /// the Pending < Sent < Delivered < Read ladder. Failed is off the
    /// ladder: nothing advances into or out of it through this check.
    pub fn advances_to(&self, next: RecipientStatus) -> bool {
        if *self == RecipientStatus::Failed || next == RecipientStatus::Failed {
            return false;
        }
        next.code() > self.code()
    }
}

impl Default for RecipientStatus {
    fn default() -> Self {
        RecipientStatus::Pending
    }
}

/// Acknowledgment statuses the transport reports after a message was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Delivered,
    Read,
}

impl AckStatus {
    pub fn recipient_status(&self) -> RecipientStatus {
        match self {
            AckStatus::Delivered => RecipientStatus::Delivered,
            AckStatus::Read => RecipientStatus::Read,
        }
    }
}

// ============================================================================
// Send Job
// ============================================================================

/// Run state of a send job. Completed and Stopped are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// The dispatch loop is live (or about to start)
    Running,
    /// The loop exhausted the recipient list
    Completed,
    /// The loop halted on a stop request
    Stopped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Stopped => "STOPPED",
        }
    }

    pub fn from_str_or_running(s: &str) -> Self {
        match s {
            "COMPLETED" => JobState::Completed,
            "STOPPED" => JobState::Stopped,
            _ => JobState::Running,
        }
    }
}

/// Overall status a job's counts roll up to, for reporting.
///
/// Derived lazily from the four counts; recomputable at any time without
/// replaying events. Codes are the values reporting clients filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Created,
    Sent,
    Delivered,
    Read,
    Partial,
    Initiated,
}

impl OverallStatus {
    pub fn code(&self) -> i32 {
        match self {
            OverallStatus::Created => 0,
            OverallStatus::Sent => 1,
            OverallStatus::Delivered => 2,
            OverallStatus::Read => 3,
            OverallStatus::Partial => 4,
            OverallStatus::Initiated => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(OverallStatus::Created),
            1 => Some(OverallStatus::Sent),
            2 => Some(OverallStatus::Delivered),
            3 => Some(OverallStatus::Read),
            4 => Some(OverallStatus::Partial),
            5 => Some(OverallStatus::Initiated),
            _ => None,
        }
    }

    /// Roll the per-status counts up to a single status.
    ///
    /// The precedence is evaluated strictly in this order:
    /// 1. no contacts at all -> Initiated
    /// 2. created rows plus any sent/delivered/read activity -> Partial
    /// 3. created rows only -> Created
    /// 4. any sent -> Sent
    /// 5. any delivered -> Delivered
    /// 6. otherwise -> Read
    pub fn derive(counts: &JobCounts) -> Self {
        if counts.total_contacts == 0 {
            OverallStatus::Initiated
        } else if counts.created_count > 0
            && (counts.sent_count > 0 || counts.delivered_count > 0 || counts.read_count > 0)
        {
            OverallStatus::Partial
        } else if counts.created_count > 0 {
            OverallStatus::Created
        } else if counts.sent_count > 0 {
            OverallStatus::Sent
        } else if counts.delivered_count > 0 {
            OverallStatus::Delivered
        } else {
            OverallStatus::Read
        }
    }
}

/// Per-status recipient counts for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub total_contacts: i64,
    pub created_count: i64,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub read_count: i64,
}

/// One bulk-dispatch run over a frozen recipient snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJob {
    pub id: String,
    pub group_id: String,
    pub group_name: String,
    pub message_id: String,
    pub message_title: String,
    #[serde(flatten)]
    pub counts: JobCounts,
    pub state: JobState,
    pub stopped_at_index: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SendJob {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn overall_status(&self) -> OverallStatus {
        OverallStatus::derive(&self.counts)
    }
}

/// One targeted contact within a send job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientDelivery {
    pub id: String,
    pub job_id: String,
    pub contact_id: String,
    pub name: Option<String>,
    pub phone: String,
    pub status: RecipientStatus,
    pub error_message: Option<String>,
    pub transport_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Read-Only Collaborator Records
// ============================================================================

/// One contact as frozen into a job snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub contact_id: String,
    pub name: Option<String>,
    pub phone: String,
    pub variable1: Option<String>,
    pub variable2: Option<String>,
    pub variable3: Option<String>,
}

/// The members of a contact group, frozen at fetch time
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_id: String,
    pub group_name: String,
    pub contacts: Vec<ContactRecord>,
}

/// A stored message template with placeholder tokens in its body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub id: String,
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
}

// ============================================================================
// Transport Types
// ============================================================================

/// Receipt the transport returns for an accepted send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub transport_message_id: String,
}

/// Failure of a single outbound send. Never fatal to the job; a timeout is
/// treated identically to any other send failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("gateway rejected send: {0}")]
    Rejected(String),

    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway request timed out")]
    Timeout,
}

// ============================================================================
// Progress Events
// ============================================================================

/// Transient notification published while a job runs.
///
/// Delivery to observers is at-most-once; anything missed is reconcilable
/// from the reports queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProgressEvent {
    /// One recipient was processed (sent or failed)
    #[serde(rename = "send-progress", rename_all = "camelCase")]
    Recipient {
        job_id: String,
        /// 1-based position in the snapshot
        index: i64,
        total: i64,
        name: Option<String>,
        phone: String,
        status: RecipientStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The loop exhausted the recipient list
    #[serde(rename = "send-complete", rename_all = "camelCase")]
    Completed { job_id: String, total: i64 },
    /// The loop halted on a stop request
    #[serde(rename = "send-stopped", rename_all = "camelCase")]
    Stopped {
        job_id: String,
        stopped_at: i64,
        total: i64,
    },
}

impl ProgressEvent {
    /// Event name used on the wire (SSE event field)
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Recipient { .. } => "send-progress",
            ProgressEvent::Completed { .. } => "send-complete",
            ProgressEvent::Stopped { .. } => "send-stopped",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            ProgressEvent::Recipient { job_id, .. } => job_id,
            ProgressEvent::Completed { job_id, .. } => job_id,
            ProgressEvent::Stopped { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_status_codes_round_trip() {
        for status in [
            RecipientStatus::Pending,
            RecipientStatus::Sent,
            RecipientStatus::Delivered,
            RecipientStatus::Read,
            RecipientStatus::Failed,
        ] {
            assert_eq!(RecipientStatus::from_code(status.code()), status);
        }
        assert_eq!(RecipientStatus::from_code(99), RecipientStatus::Pending);
    }

    #[test]
    fn ladder_advances_forward_only() {
        assert!(RecipientStatus::Pending.advances_to(RecipientStatus::Sent));
        assert!(RecipientStatus::Sent.advances_to(RecipientStatus::Delivered));
        assert!(RecipientStatus::Sent.advances_to(RecipientStatus::Read));
        assert!(!RecipientStatus::Read.advances_to(RecipientStatus::Delivered));
        assert!(!RecipientStatus::Delivered.advances_to(RecipientStatus::Delivered));
        assert!(!RecipientStatus::Failed.advances_to(RecipientStatus::Read));
        assert!(!RecipientStatus::Sent.advances_to(RecipientStatus::Failed));
    }

    #[test]
    fn terminal_statuses() {
        assert!(RecipientStatus::Read.is_terminal());
        assert!(RecipientStatus::Failed.is_terminal());
        assert!(!RecipientStatus::Sent.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Stopped.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    fn counts(total: i64, created: i64, sent: i64, delivered: i64, read: i64) -> JobCounts {
        JobCounts {
            total_contacts: total,
            created_count: created,
            sent_count: sent,
            delivered_count: delivered,
            read_count: read,
        }
    }

    #[test]
    fn overall_status_empty_job_is_initiated() {
        assert_eq!(
            OverallStatus::derive(&counts(0, 0, 0, 0, 0)),
            OverallStatus::Initiated
        );
    }

    #[test]
    fn overall_status_created_with_activity_is_partial() {
        assert_eq!(
            OverallStatus::derive(&counts(5, 5, 3, 0, 0)),
            OverallStatus::Partial
        );
        assert_eq!(
            OverallStatus::derive(&counts(5, 5, 0, 0, 1)),
            OverallStatus::Partial
        );
    }

    #[test]
    fn overall_status_created_only() {
        assert_eq!(
            OverallStatus::derive(&counts(5, 5, 0, 0, 0)),
            OverallStatus::Created
        );
    }

    #[test]
    fn overall_status_lower_precedence_branches() {
        assert_eq!(
            OverallStatus::derive(&counts(5, 0, 2, 0, 0)),
            OverallStatus::Sent
        );
        assert_eq!(
            OverallStatus::derive(&counts(5, 0, 0, 2, 0)),
            OverallStatus::Delivered
        );
        assert_eq!(
            OverallStatus::derive(&counts(5, 0, 0, 0, 5)),
            OverallStatus::Read
        );
    }

    #[test]
    fn progress_event_kinds() {
        let ev = ProgressEvent::Stopped {
            job_id: "j1".to_string(),
            stopped_at: 3,
            total: 10,
        };
        assert_eq!(ev.kind(), "send-stopped");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "send-stopped");
        assert_eq!(json["stoppedAt"], 3);
    }
}
