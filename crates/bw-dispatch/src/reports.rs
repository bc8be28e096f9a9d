//! Report Aggregator
//!
//! Read-only queries over the delivery store: filtered, paginated job and
//! recipient listings. The overall status of a job is derived from its
//! counts on every read - it is never stored, so it needs no event replay.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;

use bw_common::{RecipientDelivery, SendJob};
use bw_store::{DeliveryStore, JobFilter, Page, RecipientFilter};

use crate::error::DispatchError;
use crate::Result;

pub struct ReportService {
    store: Arc<dyn DeliveryStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: Page,
    ) -> Result<(Vec<SendJob>, i64)> {
        Ok(self.store.list_jobs(filter, page).await?)
    }

    pub async fn list_recipients(
        &self,
        job_id: &str,
        filter: &RecipientFilter,
        page: Page,
    ) -> Result<(Vec<RecipientDelivery>, i64)> {
        if self.store.job(job_id).await?.is_none() {
            return Err(DispatchError::not_found(format!("job {}", job_id)));
        }
        Ok(self.store.list_recipients(job_id, filter, page).await?)
    }
}

/// First instant of the given day, for inclusive dateFrom filters
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Last instant of the given day, for inclusive dateTo filters
pub fn day_end(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
        .and_utc()
}
