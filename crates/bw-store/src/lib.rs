//! Bulkwave Delivery Status Store
//!
//! Single source of truth for send jobs and their per-recipient delivery
//! records. Provides:
//! - DeliveryStore: job creation (atomic single-active-job check), monotonic
//!   compare-and-transition status updates, terminal transitions, and the
//!   paginated queries behind the reports endpoints
//! - GroupDirectory / TemplateCatalog: read-only collaborator seams for the
//!   group snapshot and message templates
//! - SQLite implementations of all three

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bw_common::{
    AckStatus, ContactRecord, JobState, OverallStatus, RecipientDelivery, RecipientStatus, SendJob,
};

pub mod content;
pub mod error;
pub mod sqlite;

pub use content::{GroupDirectory, SqliteContentStore, TemplateCatalog};
pub use error::StoreError;
pub use sqlite::SqliteDeliveryStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything needed to create a job and its frozen recipient snapshot
#[derive(Debug, Clone)]
pub struct NewJob {
    pub group_id: String,
    pub group_name: String,
    pub message_id: String,
    pub message_title: String,
    pub contacts: Vec<ContactRecord>,
}

/// 1-based pagination window
#[derive(Debug, Clone, Copy)]
pub struct Page {
    page: u32,
    page_size: u32,
}

impl Page {
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Clamp to page >= 1 and 1 <= page_size <= MAX_PAGE_SIZE
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

/// Filters for the jobs report query
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    /// Derived overall status to match
    pub status: Option<OverallStatus>,
    /// Free-text match over job id, group name and message title
    pub search: Option<String>,
}

/// Filters for the per-job recipients report query
#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    pub status: Option<RecipientStatus>,
    /// Free-text match over recipient name and phone
    pub search: Option<String>,
}

/// Result of applying one transport acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The transition was applied and the job count incremented
    Applied {
        job_id: String,
        status: RecipientStatus,
    },
    /// The update would not move the recipient forward; discarded
    OutOfOrder { current: RecipientStatus },
    /// No recipient carries this transport message id
    UnknownMessage,
}

/// Persistence seam for jobs and recipient deliveries.
///
/// All status writes are compare-and-transition: concurrent writers (the
/// dispatch loop and the acknowledgment listener) can never regress a row.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Create a job plus its Pending recipient rows in one transaction.
    ///
    /// Fails with [`StoreError::JobAlreadyActive`] when a non-terminal job
    /// exists; the check and the insert share the transaction so two
    /// concurrent starts can never both succeed.
    async fn create_job(&self, new_job: NewJob) -> Result<SendJob>;

    async fn job(&self, job_id: &str) -> Result<Option<SendJob>>;

    /// The current non-terminal job, if any
    async fn active_job(&self) -> Result<Option<SendJob>>;

    /// All recipient rows of a job in snapshot order
    async fn recipients_in_order(&self, job_id: &str) -> Result<Vec<RecipientDelivery>>;

    /// Pending -> Sent, recording the transport message id and send time.
    /// Returns false when the row had already left Pending.
    async fn mark_sent(
        &self,
        job_id: &str,
        recipient_id: &str,
        transport_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending -> Failed with the error message. Returns false when the row
    /// had already left Pending.
    async fn mark_failed(&self, job_id: &str, recipient_id: &str, error: &str) -> Result<bool>;

    /// Apply a delivered/read acknowledgment by transport message id,
    /// enforcing the monotonic ladder.
    async fn apply_ack(&self, transport_message_id: &str, status: AckStatus) -> Result<AckOutcome>;

    /// Move a running job to a terminal state
    async fn finish_job(
        &self,
        job_id: &str,
        state: JobState,
        stopped_at_index: Option<i64>,
    ) -> Result<()>;

    /// Filtered, paginated jobs with the total row count
    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<(Vec<SendJob>, i64)>;

    /// Filtered, paginated recipients of one job with the total row count
    async fn list_recipients(
        &self,
        job_id: &str,
        filter: &RecipientFilter,
        page: Page,
    ) -> Result<(Vec<RecipientDelivery>, i64)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_bounds() {
        let p = Page::new(0, 0);
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), 1);
        assert_eq!(p.offset(), 0);

        let p = Page::new(3, 500);
        assert_eq!(p.page_size(), Page::MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 200);
        assert_eq!(p.limit(), 100);
    }
}
