//! Send Coordinator Integration Tests
//!
//! Drives the coordinator against an in-memory SQLite store and a mock
//! transport. Covers: full completion, per-recipient failure tolerance,
//! cooperative cancellation, the single-active-job conflict, validation,
//! test sends, and progress event observation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use bw_common::{
    AckStatus, ContactRecord, GroupSnapshot, JobState, MessageTemplate, ProgressEvent,
    RecipientStatus, SendReceipt, TransportError,
};
use bw_dispatch::{
    AckListener, DispatchError, MessageTransport, OperatorProfile, ProgressBroadcaster,
    SendCoordinator, StopRegistry,
};
use bw_store::{DeliveryStore, GroupDirectory, SqliteDeliveryStore, TemplateCatalog};
use sqlx::sqlite::SqlitePoolOptions;

/// Mock transport that tracks calls and can delay or fail per phone number
struct MockTransport {
    call_count: AtomicU32,
    delay: Duration,
    fail_phones: Vec<String>,
    calls: parking_lot::Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            call_count: AtomicU32::new(0),
            delay: Duration::ZERO,
            fail_phones: vec![],
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn failing_for(phones: &[&str]) -> Self {
        Self {
            fail_phones: phones.iter().map(|p| p.to_string()).collect(),
            ..Self::new()
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send(
        &self,
        phone: &str,
        body: &str,
        _image_url: Option<&str>,
    ) -> Result<SendReceipt, TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push((phone.to_string(), body.to_string()));

        if self.fail_phones.iter().any(|p| p == phone) {
            Err(TransportError::Rejected("number not registered".to_string()))
        } else {
            Ok(SendReceipt {
                transport_message_id: format!("wa-{}", n),
            })
        }
    }
}

struct MockDirectory {
    snapshot: GroupSnapshot,
}

#[async_trait]
impl GroupDirectory for MockDirectory {
    async fn group_snapshot(&self, group_id: &str) -> bw_store::Result<Option<GroupSnapshot>> {
        if group_id == self.snapshot.group_id {
            Ok(Some(GroupSnapshot {
                group_id: self.snapshot.group_id.clone(),
                group_name: self.snapshot.group_name.clone(),
                contacts: self.snapshot.contacts.clone(),
            }))
        } else {
            Ok(None)
        }
    }
}

struct MockCatalog {
    template: MessageTemplate,
}

#[async_trait]
impl TemplateCatalog for MockCatalog {
    async fn template(&self, message_id: &str) -> bw_store::Result<Option<MessageTemplate>> {
        if message_id == self.template.id {
            Ok(Some(self.template.clone()))
        } else {
            Ok(None)
        }
    }
}

fn contact(id: &str, name: &str, phone: &str, variable1: Option<&str>) -> ContactRecord {
    ContactRecord {
        contact_id: id.to_string(),
        name: Some(name.to_string()),
        phone: phone.to_string(),
        variable1: variable1.map(str::to_string),
        variable2: None,
        variable3: None,
    }
}

struct Harness {
    coordinator: SendCoordinator,
    store: Arc<SqliteDeliveryStore>,
    broadcaster: Arc<ProgressBroadcaster>,
}

async fn harness(
    transport: Arc<dyn MessageTransport>,
    contacts: Vec<ContactRecord>,
    template_body: &str,
) -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    let store = Arc::new(SqliteDeliveryStore::new(pool));
    store.create_schema().await.expect("create schema");

    let directory = Arc::new(MockDirectory {
        snapshot: GroupSnapshot {
            group_id: "g1".to_string(),
            group_name: "Testers".to_string(),
            contacts,
        },
    });
    let catalog = Arc::new(MockCatalog {
        template: MessageTemplate {
            id: "m1".to_string(),
            title: "Welcome".to_string(),
            body: template_body.to_string(),
            image_url: None,
        },
    });
    let broadcaster = Arc::new(ProgressBroadcaster::new());

    let coordinator = SendCoordinator::new(
        store.clone(),
        directory,
        catalog,
        transport,
        broadcaster.clone(),
        Arc::new(StopRegistry::new()),
        OperatorProfile {
            phone: "999".to_string(),
            name: Some("Operator".to_string()),
        },
    );

    Harness {
        coordinator,
        store,
        broadcaster,
    }
}

/// Poll until the job reaches a terminal state
async fn wait_terminal(store: &SqliteDeliveryStore, job_id: &str) -> bw_common::SendJob {
    for _ in 0..200 {
        let job = store.job(job_id).await.unwrap().unwrap();
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

/// Drain events until a terminal event arrives (or the channel closes)
async fn collect_events(mut rx: broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(event)) => {
                let terminal = !matches!(event, ProgressEvent::Recipient { .. });
                events.push(event);
                if terminal {
                    return events;
                }
            }
            _ => return events,
        }
    }
}

#[tokio::test]
async fn completes_and_tracks_every_recipient() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(20)));
    let h = harness(
        transport.clone(),
        vec![
            contact("c1", "Ana", "111", Some("123")),
            contact("c2", "Bob", "222", None),
            contact("c3", "Cleo", "333", None),
        ],
        "@name, your code is @variable1",
    )
    .await;

    let job_id = h.coordinator.start("g1", "m1").await.unwrap();
    let rx = h.broadcaster.subscribe(&job_id);

    let job = wait_terminal(&h.store, &job_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.counts.sent_count, 3);
    assert!(job.finished_at.is_some());

    let recipients = h.store.recipients_in_order(&job_id).await.unwrap();
    assert!(recipients
        .iter()
        .all(|r| r.status == RecipientStatus::Sent && r.transport_message_id.is_some()));

    // Processed (sent + failed) plus remaining pending covers the snapshot
    let pending = recipients
        .iter()
        .filter(|r| r.status == RecipientStatus::Pending)
        .count() as i64;
    assert_eq!(job.counts.sent_count + pending, job.counts.total_contacts);

    // Rendering used each recipient's own attributes
    let calls = transport.calls();
    assert_eq!(calls[0], ("111".to_string(), "Ana, your code is 123".to_string()));
    // No variable1 for Bob: the token stays literal
    assert_eq!(calls[1].1, "Bob, your code is @variable1");

    let events = collect_events(rx).await;
    let last = events.last().unwrap();
    assert_eq!(last, &ProgressEvent::Completed { job_id: job_id.clone(), total: 3 });
}

#[tokio::test]
async fn failed_send_never_aborts_the_loop() {
    let transport = Arc::new(MockTransport::failing_for(&["222"]));
    let h = harness(
        transport,
        vec![
            contact("c1", "Ana", "111", None),
            contact("c2", "Bob", "222", None),
            contact("c3", "Cleo", "333", None),
        ],
        "hello @name",
    )
    .await;

    let job_id = h.coordinator.start("g1", "m1").await.unwrap();
    let job = wait_terminal(&h.store, &job_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.counts.sent_count, 2);

    let recipients = h.store.recipients_in_order(&job_id).await.unwrap();
    assert_eq!(recipients[0].status, RecipientStatus::Sent);
    assert_eq!(recipients[1].status, RecipientStatus::Failed);
    assert!(recipients[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("number not registered"));
    assert_eq!(recipients[2].status, RecipientStatus::Sent);

    let failed = recipients
        .iter()
        .filter(|r| r.status == RecipientStatus::Failed)
        .count() as i64;
    assert_eq!(job.counts.sent_count + failed, job.counts.total_contacts);
}

#[tokio::test]
async fn stop_request_halts_between_recipients() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(30)));
    let h = harness(
        transport,
        vec![
            contact("c1", "Ana", "111", None),
            contact("c2", "Bob", "222", None),
            contact("c3", "Cleo", "333", None),
            contact("c4", "Dan", "444", None),
            contact("c5", "Eva", "555", None),
        ],
        "hello @name",
    )
    .await;

    let job_id = h.coordinator.start("g1", "m1").await.unwrap();
    let rx = h.broadcaster.subscribe(&job_id);

    // Let at least one recipient through, then ask for a stop
    for _ in 0..200 {
        let job = h.store.job(&job_id).await.unwrap().unwrap();
        if job.counts.sent_count >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.coordinator.request_stop(&job_id).await.unwrap());

    let job = wait_terminal(&h.store, &job_id).await;
    assert_eq!(job.state, JobState::Stopped);

    let stopped_at = job.stopped_at_index.expect("stop position recorded");
    assert!(stopped_at >= 1 && stopped_at < 5);

    // Exactly the processed prefix left Pending behind
    let recipients = h.store.recipients_in_order(&job_id).await.unwrap();
    let processed = recipients
        .iter()
        .filter(|r| r.status != RecipientStatus::Pending)
        .count() as i64;
    let pending = 5 - processed;
    assert_eq!(processed, stopped_at);
    assert_eq!(
        pending,
        recipients
            .iter()
            .filter(|r| r.status == RecipientStatus::Pending)
            .count() as i64
    );

    let events = collect_events(rx).await;
    match events.last().unwrap() {
        ProgressEvent::Stopped {
            stopped_at: at,
            total,
            ..
        } => {
            assert_eq!(*at, stopped_at);
            assert_eq!(*total, 5);
        }
        other => panic!("expected a stopped event, got {:?}", other),
    }

    // The job is terminal now; a second stop request is stale
    assert!(!h.coordinator.request_stop(&job_id).await.unwrap());

    // An id no job ever had is not found
    let err = h.coordinator.request_stop("no-such-job").await.unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
}

#[tokio::test]
async fn second_start_conflicts_while_running() {
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(30)));
    let h = harness(
        transport,
        vec![
            contact("c1", "Ana", "111", None),
            contact("c2", "Bob", "222", None),
        ],
        "hi",
    )
    .await;

    let job_id = h.coordinator.start("g1", "m1").await.unwrap();
    let err = h.coordinator.start("g1", "m1").await.unwrap_err();
    assert!(matches!(err, DispatchError::Conflict));

    wait_terminal(&h.store, &job_id).await;
    h.coordinator.start("g1", "m1").await.unwrap();
}

#[tokio::test]
async fn start_validates_inputs() {
    let transport = Arc::new(MockTransport::new());
    let h = harness(
        transport,
        vec![contact("c1", "Ana", "111", None)],
        "hi",
    )
    .await;

    for (group, message) in [("", "m1"), ("g1", ""), ("g1", "nope"), ("ghost", "m1")] {
        let err = h.coordinator.start(group, message).await.unwrap_err();
        assert!(
            matches!(err, DispatchError::Validation(_)),
            "{}/{} should fail validation",
            group,
            message
        );
    }
}

#[tokio::test]
async fn empty_group_is_rejected() {
    let transport = Arc::new(MockTransport::new());
    let h = harness(transport, vec![], "hi").await;

    let err = h.coordinator.start("g1", "m1").await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
}

#[tokio::test]
async fn test_send_targets_the_operator() {
    let transport = Arc::new(MockTransport::new());
    let h = harness(
        transport.clone(),
        vec![contact("c1", "Ana", "111", None)],
        "hola @name",
    )
    .await;

    let message = h.coordinator.send_test("m1").await.unwrap();
    assert!(message.contains("999"));

    let calls = transport.calls();
    assert_eq!(calls, vec![("999".to_string(), "hola Operator".to_string())]);

    // No job row was created for the preview
    let (_, total) = h
        .store
        .list_jobs(&bw_store::JobFilter::default(), bw_store::Page::new(1, 10))
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn acknowledgments_flow_into_the_job_counts() {
    let transport = Arc::new(MockTransport::new());
    let h = harness(
        transport,
        vec![contact("c1", "Ana", "111", None)],
        "hi",
    )
    .await;

    let job_id = h.coordinator.start("g1", "m1").await.unwrap();
    wait_terminal(&h.store, &job_id).await;

    let recipients = h.store.recipients_in_order(&job_id).await.unwrap();
    let tmid = recipients[0].transport_message_id.clone().unwrap();

    let listener = AckListener::new(h.store.clone());
    listener
        .on_acknowledgment(&tmid, AckStatus::Delivered, chrono::Utc::now())
        .await
        .unwrap();
    // Out-of-order duplicate is quietly discarded
    listener
        .on_acknowledgment(&tmid, AckStatus::Delivered, chrono::Utc::now())
        .await
        .unwrap();

    let job = h.store.job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.counts.delivered_count, 1);

    let recipients = h.store.recipients_in_order(&job_id).await.unwrap();
    assert_eq!(recipients[0].status, RecipientStatus::Delivered);
}
