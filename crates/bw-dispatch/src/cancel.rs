//! Cancellation Controller - cooperative per-job stop flags
//!
//! A stop request flips a shared flag the send loop polls between
//! recipients; the recipient being sent to when the request lands still
//! completes. Requests for unknown or already-terminal jobs are a no-op
//! reported as not accepted, which covers the race where the job finished
//! just before the request arrived.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared stop flag handed to a send loop
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Registry of stop flags for the jobs currently dispatching
#[derive(Default)]
pub struct StopRegistry {
    flags: DashMap<String, StopFlag>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag for a starting job and hand it to the loop
    pub fn register(&self, job_id: &str) -> StopFlag {
        let flag = StopFlag::new();
        self.flags.insert(job_id.to_string(), flag.clone());
        flag
    }

    /// Request a stop. Accepted only while the job's loop is live.
    pub fn request_stop(&self, job_id: &str) -> bool {
        match self.flags.get(job_id) {
            Some(flag) => {
                flag.request();
                info!(job_id = %job_id, "stop requested");
                true
            }
            None => false,
        }
    }

    /// Drop the flag once the job reached a terminal state
    pub fn clear(&self, job_id: &str) {
        self.flags.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_unknown_job_is_not_accepted() {
        let registry = StopRegistry::new();
        assert!(!registry.request_stop("missing"));
    }

    #[test]
    fn stop_live_job_flips_the_flag() {
        let registry = StopRegistry::new();
        let flag = registry.register("j1");
        assert!(!flag.is_stop_requested());

        assert!(registry.request_stop("j1"));
        assert!(flag.is_stop_requested());
    }

    #[test]
    fn stop_after_clear_is_stale() {
        let registry = StopRegistry::new();
        let flag = registry.register("j1");
        registry.clear("j1");

        assert!(!registry.request_stop("j1"));
        assert!(!flag.is_stop_requested());
    }
}
