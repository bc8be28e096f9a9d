//! Bulkwave Dispatch Engine
//!
//! This crate provides the core send-and-track functionality:
//! - SendCoordinator: owns the per-job send loop (render, send, transition,
//!   publish, check for stop requests)
//! - StopRegistry: cooperative per-job cancellation flags
//! - ProgressBroadcaster: at-most-once fan-out of progress events to live
//!   observers
//! - AckListener: applies delivered/read confirmations from the transport
//! - ReportService: paginated, filterable job and recipient reports
//! - MessageTransport / HttpTransport: the outbound gateway seam
//! - API: HTTP endpoints for dispatch control, the SSE event stream, the
//!   acknowledgment webhook and the reports

pub mod ack;
pub mod api;
pub mod broadcaster;
pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod reports;
pub mod template;
pub mod transport;

pub use ack::AckListener;
pub use broadcaster::ProgressBroadcaster;
pub use cancel::{StopFlag, StopRegistry};
pub use coordinator::{OperatorProfile, SendCoordinator};
pub use error::DispatchError;
pub use reports::ReportService;
pub use transport::{HttpTransport, HttpTransportConfig, MessageTransport};

pub type Result<T> = std::result::Result<T, DispatchError>;
