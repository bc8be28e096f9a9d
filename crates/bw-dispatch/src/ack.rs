//! Acknowledgment Listener
//!
//! The transport reports delivered/read confirmations out of band, at
//! unpredictable times after a send. The listener applies them through the
//! store's monotonic compare-and-transition; duplicates, regressions and
//! unknown message ids are discarded quietly - they are expected traffic,
//! not errors - and only logged for diagnostics.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use bw_common::AckStatus;
use bw_store::{AckOutcome, DeliveryStore};

use crate::Result;

pub struct AckListener {
    store: Arc<dyn DeliveryStore>,
}

impl AckListener {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    /// Apply one confirmation. Succeeds (with a log line) whether or not the
    /// update was applied; only store failures surface as errors.
    pub async fn on_acknowledgment(
        &self,
        transport_message_id: &str,
        status: AckStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        match self.store.apply_ack(transport_message_id, status).await? {
            AckOutcome::Applied { job_id, status } => {
                debug!(
                    job_id = %job_id,
                    transport_message_id = %transport_message_id,
                    status = ?status,
                    at = %timestamp,
                    "acknowledgment recorded"
                );
            }
            AckOutcome::OutOfOrder { current } => {
                debug!(
                    transport_message_id = %transport_message_id,
                    current = ?current,
                    incoming = ?status,
                    "out-of-order acknowledgment discarded"
                );
            }
            AckOutcome::UnknownMessage => {
                debug!(
                    transport_message_id = %transport_message_id,
                    "acknowledgment for unknown transport message id discarded"
                );
            }
        }
        Ok(())
    }
}
