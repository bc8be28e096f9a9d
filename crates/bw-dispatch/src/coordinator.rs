//! Send Coordinator - owns the dispatch loop
//!
//! `start` freezes the group into a job snapshot and spawns the loop as a
//! detached task; the caller gets the job id immediately. The loop walks the
//! snapshot in order, checking the stop flag before each recipient, and a
//! failed send never aborts it - only a stop request or exhausting the list
//! ends a job.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bw_common::{
    ContactRecord, JobState, MessageTemplate, ProgressEvent, RecipientDelivery, RecipientStatus,
};
use bw_store::{DeliveryStore, GroupDirectory, NewJob, TemplateCatalog};

use crate::broadcaster::ProgressBroadcaster;
use crate::cancel::{StopFlag, StopRegistry};
use crate::error::DispatchError;
use crate::template;
use crate::transport::MessageTransport;
use crate::Result;

/// The operator's own messaging identity, used for template test sends
#[derive(Debug, Clone)]
pub struct OperatorProfile {
    pub phone: String,
    pub name: Option<String>,
}

pub struct SendCoordinator {
    store: Arc<dyn DeliveryStore>,
    directory: Arc<dyn GroupDirectory>,
    catalog: Arc<dyn TemplateCatalog>,
    transport: Arc<dyn MessageTransport>,
    broadcaster: Arc<ProgressBroadcaster>,
    stops: Arc<StopRegistry>,
    operator: OperatorProfile,
}

impl SendCoordinator {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        directory: Arc<dyn GroupDirectory>,
        catalog: Arc<dyn TemplateCatalog>,
        transport: Arc<dyn MessageTransport>,
        broadcaster: Arc<ProgressBroadcaster>,
        stops: Arc<StopRegistry>,
        operator: OperatorProfile,
    ) -> Self {
        Self {
            store,
            directory,
            catalog,
            transport,
            broadcaster,
            stops,
            operator,
        }
    }

    /// Create a job for the group/template pair and start dispatching in the
    /// background. Returns the job id as soon as the job row and its frozen
    /// recipient snapshot exist.
    pub async fn start(&self, group_id: &str, message_id: &str) -> Result<String> {
        if group_id.trim().is_empty() {
            return Err(DispatchError::validation("groupId is required"));
        }
        if message_id.trim().is_empty() {
            return Err(DispatchError::validation("messageId is required"));
        }

        let template = self
            .catalog
            .template(message_id)
            .await?
            .ok_or_else(|| DispatchError::validation(format!("unknown message: {}", message_id)))?;

        let snapshot = self
            .directory
            .group_snapshot(group_id)
            .await?
            .ok_or_else(|| DispatchError::validation(format!("unknown group: {}", group_id)))?;
        if snapshot.contacts.is_empty() {
            return Err(DispatchError::validation(format!(
                "group {} has no contacts",
                group_id
            )));
        }

        // The store rejects this atomically while another job is live
        let job = self
            .store
            .create_job(NewJob {
                group_id: snapshot.group_id.clone(),
                group_name: snapshot.group_name.clone(),
                message_id: template.id.clone(),
                message_title: template.title.clone(),
                contacts: snapshot.contacts.clone(),
            })
            .await?;

        let recipients = self.store.recipients_in_order(&job.id).await?;
        let flag = self.stops.register(&job.id);

        info!(
            job_id = %job.id,
            group_id = %group_id,
            message_id = %message_id,
            total_contacts = recipients.len(),
            "dispatch started"
        );

        self.spawn_loop(job.id.clone(), template, snapshot.contacts, recipients, flag);

        Ok(job.id)
    }

    fn spawn_loop(
        &self,
        job_id: String,
        template: MessageTemplate,
        contacts: Vec<ContactRecord>,
        recipients: Vec<RecipientDelivery>,
        flag: StopFlag,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let broadcaster = self.broadcaster.clone();
        let stops = self.stops.clone();

        tokio::spawn(async move {
            Self::run_send_loop(
                job_id,
                template,
                contacts,
                recipients,
                flag,
                store,
                transport,
                broadcaster,
                stops,
            )
            .await;
        })
    }

    /// The dispatch loop for one job. Runs detached from the start request.
    #[allow(clippy::too_many_arguments)]
    async fn run_send_loop(
        job_id: String,
        template: MessageTemplate,
        contacts: Vec<ContactRecord>,
        recipients: Vec<RecipientDelivery>,
        flag: StopFlag,
        store: Arc<dyn DeliveryStore>,
        transport: Arc<dyn MessageTransport>,
        broadcaster: Arc<ProgressBroadcaster>,
        stops: Arc<StopRegistry>,
    ) {
        let total = recipients.len() as i64;
        let mut processed: i64 = 0;

        // Recipient rows were created from the snapshot in order, so the two
        // walk in lockstep: the row carries identity, the contact carries the
        // placeholder values.
        for (recipient, contact) in recipients.iter().zip(contacts.iter()) {
            // Cancellation is observed between recipients only; a send
            // already in flight when the request lands still completes.
            if flag.is_stop_requested() {
                if let Err(err) = store
                    .finish_job(&job_id, JobState::Stopped, Some(processed))
                    .await
                {
                    error!(job_id = %job_id, error = %err, "failed to record stopped job");
                }
                info!(
                    job_id = %job_id,
                    stopped_at = processed,
                    total = total,
                    "dispatch stopped on request"
                );
                broadcaster.publish_and_close(&ProgressEvent::Stopped {
                    job_id: job_id.clone(),
                    stopped_at: processed,
                    total,
                });
                stops.clear(&job_id);
                return;
            }

            let body = template::render(&template.body, contact);
            let index = processed + 1;

            match transport
                .send(&recipient.phone, &body, template.image_url.as_deref())
                .await
            {
                Ok(receipt) => {
                    if let Err(err) = store
                        .mark_sent(
                            &job_id,
                            &recipient.id,
                            &receipt.transport_message_id,
                            Utc::now(),
                        )
                        .await
                    {
                        error!(
                            job_id = %job_id,
                            recipient_id = %recipient.id,
                            error = %err,
                            "failed to record sent recipient"
                        );
                    }
                    broadcaster.publish(&ProgressEvent::Recipient {
                        job_id: job_id.clone(),
                        index,
                        total,
                        name: recipient.name.clone(),
                        phone: recipient.phone.clone(),
                        status: RecipientStatus::Sent,
                        error: None,
                    });
                }
                Err(send_err) => {
                    let message = send_err.to_string();
                    warn!(
                        job_id = %job_id,
                        phone = %recipient.phone,
                        error = %message,
                        "send failed, continuing with next recipient"
                    );
                    if let Err(err) = store.mark_failed(&job_id, &recipient.id, &message).await {
                        error!(
                            job_id = %job_id,
                            recipient_id = %recipient.id,
                            error = %err,
                            "failed to record failed recipient"
                        );
                    }
                    broadcaster.publish(&ProgressEvent::Recipient {
                        job_id: job_id.clone(),
                        index,
                        total,
                        name: recipient.name.clone(),
                        phone: recipient.phone.clone(),
                        status: RecipientStatus::Failed,
                        error: Some(message),
                    });
                }
            }

            processed += 1;
        }

        if let Err(err) = store.finish_job(&job_id, JobState::Completed, None).await {
            error!(job_id = %job_id, error = %err, "failed to record completed job");
        }
        info!(job_id = %job_id, total = total, "dispatch completed");
        broadcaster.publish_and_close(&ProgressEvent::Completed {
            job_id: job_id.clone(),
            total,
        });
        stops.clear(&job_id);
    }

    /// Request a cooperative stop. Accepted only while the job's loop is
    /// live; a request for an already-finished job is a no-op reported as
    /// not accepted, and an id no job ever had is NotFound.
    pub async fn request_stop(&self, job_id: &str) -> Result<bool> {
        if self.stops.request_stop(job_id) {
            return Ok(true);
        }
        match self.store.job(job_id).await? {
            Some(_) => Ok(false),
            None => Err(DispatchError::not_found(format!("job {}", job_id))),
        }
    }

    /// Render the template against the operator's own profile and send it
    /// once to the operator's number, outside any job bookkeeping.
    pub async fn send_test(&self, message_id: &str) -> Result<String> {
        if message_id.trim().is_empty() {
            return Err(DispatchError::validation("messageId is required"));
        }

        let template = self
            .catalog
            .template(message_id)
            .await?
            .ok_or_else(|| DispatchError::validation(format!("unknown message: {}", message_id)))?;

        let preview = ContactRecord {
            contact_id: "operator".to_string(),
            name: self.operator.name.clone(),
            phone: self.operator.phone.clone(),
            variable1: None,
            variable2: None,
            variable3: None,
        };
        let body = template::render(&template.body, &preview);

        self.transport
            .send(&self.operator.phone, &body, template.image_url.as_deref())
            .await?;

        info!(message_id = %message_id, phone = %self.operator.phone, "test message sent");
        Ok(format!("Test message sent to {}", self.operator.phone))
    }
}
