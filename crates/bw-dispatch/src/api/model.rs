use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use bw_common::{AckStatus, JobState, OverallStatus, RecipientDelivery, RecipientStatus, SendJob};

/// Request to start a bulk dispatch
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSendRequest {
    /// Contact group to dispatch to
    pub group_id: String,
    /// Message template to render per recipient
    pub message_id: String,
}

/// Response after a dispatch was started
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSendResponse {
    pub job_id: String,
    pub message: String,
}

/// Request to stop a running dispatch
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopSendRequest {
    pub job_id: String,
}

/// Whether the stop request reached a live job
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopSendResponse {
    pub accepted: bool,
}

/// Request to send a template preview to the operator's own number
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestSendRequest {
    pub message_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestSendResponse {
    pub message: String,
}

/// Delivery/read confirmation posted by the messaging gateway
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub transport_message_id: String,
    pub status: AckStatus,
    /// When the gateway observed the confirmation (defaults to now)
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for the jobs report
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct JobsQuery {
    /// 1-based page (default 1)
    pub page: Option<u32>,
    /// Rows per page (default 10, max 100)
    pub page_size: Option<u32>,
    /// Inclusive first day
    pub date_from: Option<NaiveDate>,
    /// Inclusive last day
    pub date_to: Option<NaiveDate>,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    /// Derived overall status code (0..5)
    pub status: Option<i32>,
    /// Free text over job id, group name, message title
    pub search: Option<String>,
}

/// Query parameters for the per-job recipients report
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct RecipientsQuery {
    /// 1-based page (default 1)
    pub page: Option<u32>,
    /// Rows per page (default 20, max 100)
    pub page_size: Option<u32>,
    /// Recipient status code (0..4)
    pub status: Option<i32>,
    /// Free text over recipient name and phone
    pub search: Option<String>,
}

/// Job row in the reports listing
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobReportRow {
    pub id: String,
    pub group_id: String,
    pub group_name: String,
    pub message_id: String,
    pub message_title: String,
    pub total_contacts: i64,
    pub created_count: i64,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub read_count: i64,
    pub state: JobState,
    pub overall_status: OverallStatus,
    pub stopped_at_index: Option<i64>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl From<SendJob> for JobReportRow {
    fn from(job: SendJob) -> Self {
        let overall_status = job.overall_status();
        Self {
            id: job.id,
            group_id: job.group_id,
            group_name: job.group_name,
            message_id: job.message_id,
            message_title: job.message_title,
            total_contacts: job.counts.total_contacts,
            created_count: job.counts.created_count,
            sent_count: job.counts.sent_count,
            delivered_count: job.counts.delivered_count,
            read_count: job.counts.read_count,
            state: job.state,
            overall_status,
            stopped_at_index: job.stopped_at_index,
            created_at: job.created_at.to_rfc3339(),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Recipient row in the per-job report
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecipientReportRow {
    pub id: String,
    pub contact_id: String,
    pub name: Option<String>,
    pub phone: String,
    pub status: RecipientStatus,
    pub error_message: Option<String>,
    pub transport_message_id: Option<String>,
    pub sent_at: Option<String>,
}

impl From<RecipientDelivery> for RecipientReportRow {
    fn from(r: RecipientDelivery) -> Self {
        Self {
            id: r.id,
            contact_id: r.contact_id,
            name: r.name,
            phone: r.phone,
            status: r.status,
            error_message: r.error_message,
            transport_message_id: r.transport_message_id,
            sent_at: r.sent_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Paginated jobs listing
#[derive(Debug, Serialize, ToSchema)]
pub struct JobListResponse {
    pub data: Vec<JobReportRow>,
    pub total: i64,
}

/// Paginated recipients listing
#[derive(Debug, Serialize, ToSchema)]
pub struct RecipientListResponse {
    pub data: Vec<RecipientReportRow>,
    pub total: i64,
}

/// Simple health response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status: UP
    pub status: String,
    /// Application version
    pub version: String,
}
