//! Progress Broadcaster - pub/sub fan-out of transient progress events
//!
//! One broadcast channel per live job, kept in a concurrent map. Publishing
//! never blocks the send loop: a slow or absent observer just misses events
//! (at-most-once delivery). Anything missed is reconcilable through the
//! reports queries.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use bw_common::ProgressEvent;

/// Buffered events per observer before the oldest are dropped
const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: DashMap<String, broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the event stream of a job. Observers joining after events were
    /// published will not see them retroactively.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to the job's observers, if any. Never blocks.
    pub fn publish(&self, event: &ProgressEvent) {
        if let Some(tx) = self.channels.get(event.job_id()) {
            // A send error only means there are no receivers right now
            let _ = tx.send(event.clone());
        }
    }

    /// Publish a terminal event and drop the job's channel. Observers see the
    /// event and then end-of-stream.
    pub fn publish_and_close(&self, event: &ProgressEvent) {
        self.publish(event);
        self.channels.remove(event.job_id());
        debug!(job_id = %event.job_id(), "progress channel closed");
    }

    /// Number of jobs with an open channel (observers or publishers)
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}
