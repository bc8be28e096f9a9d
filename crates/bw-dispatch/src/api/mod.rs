//! Bulkwave HTTP API
//!
//! Endpoints for:
//! - Starting, stopping and test-firing dispatches
//! - The per-job SSE progress stream
//! - The gateway acknowledgment webhook
//! - Paginated job and recipient reports
//! - Health checks

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use utoipa::OpenApi;

use bw_common::{OverallStatus, RecipientStatus};
use bw_store::{JobFilter, Page, RecipientFilter};

use crate::ack::AckListener;
use crate::broadcaster::ProgressBroadcaster;
use crate::coordinator::SendCoordinator;
use crate::error::{DispatchError, ErrorResponse};
use crate::reports::{day_end, day_start, ReportService};

pub mod model;

use model::{
    AckRequest, HealthResponse, JobListResponse, JobsQuery, RecipientListResponse,
    RecipientsQuery, StartSendRequest, StartSendResponse, StopSendRequest, StopSendResponse,
    TestSendRequest, TestSendResponse,
};

const DEFAULT_JOBS_PAGE_SIZE: u32 = 10;
const DEFAULT_RECIPIENTS_PAGE_SIZE: u32 = 20;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SendCoordinator>,
    pub ack_listener: Arc<AckListener>,
    pub reports: Arc<ReportService>,
    pub broadcaster: Arc<ProgressBroadcaster>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(start_send, stop_send, test_send, receive_ack, list_jobs, list_recipients, health),
    components(schemas(
        StartSendRequest,
        StartSendResponse,
        StopSendRequest,
        StopSendResponse,
        TestSendRequest,
        TestSendResponse,
        AckRequest,
        JobListResponse,
        RecipientListResponse,
        HealthResponse,
        ErrorResponse,
    )),
    tags(
        (name = "messages", description = "Dispatch control and progress"),
        (name = "reports", description = "Delivery reporting")
    )
)]
pub struct ApiDoc;

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/messages/send", post(start_send))
        .route("/api/messages/stop-send", post(stop_send))
        .route("/api/messages/test-send", post(test_send))
        .route("/api/messages/events/:job_id", get(job_events))
        .route("/api/acks", post(receive_ack))
        .route("/api/reports/jobs", get(list_jobs))
        .route("/api/reports/jobs/:job_id/recipients", get(list_recipients))
        .with_state(state)
}

/// Start dispatching a template to every contact in a group
#[utoipa::path(
    post,
    path = "/api/messages/send",
    tag = "messages",
    request_body = StartSendRequest,
    responses(
        (status = 202, description = "Dispatch started", body = StartSendResponse),
        (status = 400, description = "Missing or unknown group/message", body = ErrorResponse),
        (status = 409, description = "A dispatch is already running", body = ErrorResponse)
    )
)]
async fn start_send(
    State(state): State<AppState>,
    Json(req): Json<StartSendRequest>,
) -> Result<(StatusCode, Json<StartSendResponse>), DispatchError> {
    let job_id = state.coordinator.start(&req.group_id, &req.message_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartSendResponse {
            job_id,
            message: "Dispatch started".to_string(),
        }),
    ))
}

/// Request a cooperative stop of a running dispatch.
/// `accepted: false` means the job had already finished (not an error).
#[utoipa::path(
    post,
    path = "/api/messages/stop-send",
    tag = "messages",
    request_body = StopSendRequest,
    responses(
        (status = 200, description = "Stop request processed", body = StopSendResponse),
        (status = 404, description = "No job ever had this id", body = ErrorResponse)
    )
)]
async fn stop_send(
    State(state): State<AppState>,
    Json(req): Json<StopSendRequest>,
) -> Result<Json<StopSendResponse>, DispatchError> {
    let accepted = state.coordinator.request_stop(&req.job_id).await?;
    Ok(Json(StopSendResponse { accepted }))
}

/// Send a template preview to the operator's own number
#[utoipa::path(
    post,
    path = "/api/messages/test-send",
    tag = "messages",
    request_body = TestSendRequest,
    responses(
        (status = 200, description = "Preview sent", body = TestSendResponse),
        (status = 400, description = "Unknown message", body = ErrorResponse),
        (status = 502, description = "Gateway failure", body = ErrorResponse)
    )
)]
async fn test_send(
    State(state): State<AppState>,
    Json(req): Json<TestSendRequest>,
) -> Result<Json<TestSendResponse>, DispatchError> {
    let message = state.coordinator.send_test(&req.message_id).await?;
    Ok(Json(TestSendResponse { message }))
}

/// SSE stream of a job's progress events.
///
/// Events are named send-progress / send-complete / send-stopped with JSON
/// payloads. Delivery is at-most-once: observers connecting late should
/// reconcile through the reports endpoints.
#[utoipa::path(
    get,
    path = "/api/messages/events/{job_id}",
    tag = "messages",
    params(("job_id" = String, Path, description = "Job to observe")),
    responses(
        (status = 200, description = "text/event-stream of progress events")
    )
)]
async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcaster.subscribe(&job_id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                    let sse_event = Event::default().event(event.kind()).data(data);
                    return Some((Ok::<_, Infallible>(sse_event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "slow observer dropped events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Gateway webhook for delivered/read confirmations
#[utoipa::path(
    post,
    path = "/api/acks",
    tag = "messages",
    request_body = AckRequest,
    responses(
        (status = 204, description = "Acknowledgment processed (applied or discarded)")
    )
)]
async fn receive_ack(
    State(state): State<AppState>,
    Json(req): Json<AckRequest>,
) -> Result<StatusCode, DispatchError> {
    let timestamp = req.timestamp.unwrap_or_else(Utc::now);
    state
        .ack_listener
        .on_acknowledgment(&req.transport_message_id, req.status, timestamp)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Paginated, filterable jobs report
#[utoipa::path(
    get,
    path = "/api/reports/jobs",
    tag = "reports",
    params(JobsQuery),
    responses(
        (status = 200, description = "Jobs with derived overall status", body = JobListResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<JobListResponse>, DispatchError> {
    let status = query
        .status
        .map(|code| {
            OverallStatus::from_code(code)
                .ok_or_else(|| DispatchError::validation(format!("invalid status: {}", code)))
        })
        .transpose()?;

    let filter = JobFilter {
        date_from: query.date_from.map(day_start),
        date_to: query.date_to.map(day_end),
        group_id: query.group_id,
        message_id: query.message_id,
        status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let page = Page::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_JOBS_PAGE_SIZE),
    );

    let (jobs, total) = state.reports.list_jobs(&filter, page).await?;
    Ok(Json(JobListResponse {
        data: jobs.into_iter().map(Into::into).collect(),
        total,
    }))
}

/// Paginated, filterable recipients report for one job
#[utoipa::path(
    get,
    path = "/api/reports/jobs/{job_id}/recipients",
    tag = "reports",
    params(("job_id" = String, Path, description = "Job id"), RecipientsQuery),
    responses(
        (status = 200, description = "Recipient delivery rows", body = RecipientListResponse),
        (status = 404, description = "Unknown job", body = ErrorResponse)
    )
)]
async fn list_recipients(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<RecipientsQuery>,
) -> Result<Json<RecipientListResponse>, DispatchError> {
    let status = query
        .status
        .map(|code| {
            if (0..=4).contains(&code) {
                Ok(RecipientStatus::from_code(code))
            } else {
                Err(DispatchError::validation(format!("invalid status: {}", code)))
            }
        })
        .transpose()?;

    let filter = RecipientFilter {
        status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let page = Page::new(
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_RECIPIENTS_PAGE_SIZE),
    );

    let (recipients, total) = state.reports.list_recipients(&job_id, &filter, page).await?;
    Ok(Json(RecipientListResponse {
        data: recipients.into_iter().map(Into::into).collect(),
        total,
    }))
}

/// Basic health check
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
