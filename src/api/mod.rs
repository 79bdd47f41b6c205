//! HTTP API.
//!
//! - `POST /events`: submit an event
//! - `POST /subscribers`, `GET|DELETE /subscribers/:player_id`: registration
//! - `GET /operator/dead-letters`, `GET /operator/status`: operator view
//! - `POST /operator/tasks/:event_id/:player_id/cancel`: cancel a task
//! - `POST /operator/dispatch/resume`: clear a dispatch halt
//! - `GET /health`

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::model::{DeliveryTask, NewEvent, Sequence, Subscriber, SubscriberFilter};
use crate::notifier::{Notifier, NotifierError, OperatorStatus, SubmitError};
use crate::registry::RegistryError;
use crate::tracker::CancelOutcome;

/// Shared state for axum handlers.
type AppState = Arc<Notifier>;

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(
    notifier: Arc<Notifier>,
    config: &ServerConfig,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(notifier);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(notifier: Arc<Notifier>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(submit_event))
        .route("/subscribers", post(register_subscriber))
        .route(
            "/subscribers/:player_id",
            get(get_subscriber).delete(deactivate_subscriber),
        )
        .route("/operator/dead-letters", get(dead_letters))
        .route("/operator/status", get(status))
        .route(
            "/operator/tasks/:event_id/:player_id/cancel",
            post(cancel_task),
        )
        .route("/operator/dispatch/resume", post(resume_dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(notifier)
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    fn unavailable(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs.max(1)),
            ..Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Busy { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                ApiError::unavailable(e.to_string(), secs)
            }
            SubmitError::LogUnavailable(_) => ApiError::unavailable(e.to_string(), 1),
            SubmitError::InvalidEvent(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
}

impl From<NotifierError> for ApiError {
    fn from(e: NotifierError) -> Self {
        match e {
            NotifierError::Registry(RegistryError::SubscriberInvalid { .. }) => {
                ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            e => {
                error!(error = %e, "Request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitEventRequest {
    game_id: String,
    /// Base64 of the opaque payload.
    payload: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEventResponse {
    pub event_id: Sequence,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    player_id: String,
    #[serde(default)]
    filter: SubscriberFilter,
    endpoint: String,
}

/// Task as shown to operators, with its delivery id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub delivery_id: Uuid,
    #[serde(flatten)]
    pub task: DeliveryTask,
}

impl From<DeliveryTask> for TaskView {
    fn from(task: DeliveryTask) -> Self {
        Self {
            delivery_id: task.delivery_id(),
            task,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResumeResponse {
    resumed: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn submit_event(
    State(notifier): State<AppState>,
    body: Result<Json<SubmitEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitEventResponse>), ApiError> {
    let Json(request) = body?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(&request.payload)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("payload is not base64: {}", e)))?;

    let event = notifier
        .submit(NewEvent::new(request.game_id, payload).with_tags(request.tags))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitEventResponse { event_id: event.id }),
    ))
}

async fn register_subscriber(
    State(notifier): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Subscriber>, ApiError> {
    let Json(request) = body?;
    let subscriber = notifier
        .register(&request.player_id, request.filter, &request.endpoint)
        .await?;
    Ok(Json(subscriber))
}

async fn get_subscriber(
    State(notifier): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<Subscriber>, ApiError> {
    notifier
        .subscriber(&player_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found_subscriber(&player_id))
}

async fn deactivate_subscriber(
    State(notifier): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<Subscriber>, ApiError> {
    if !notifier.deactivate(&player_id).await? {
        return Err(not_found_subscriber(&player_id));
    }
    notifier
        .subscriber(&player_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found_subscriber(&player_id))
}

fn not_found_subscriber(player_id: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        format!("subscriber {} not found", player_id),
    )
}

async fn dead_letters(State(notifier): State<AppState>) -> Result<Json<Vec<TaskView>>, ApiError> {
    let tasks = notifier.dead_letters().await?;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

async fn status(State(notifier): State<AppState>) -> Result<Json<OperatorStatus>, ApiError> {
    Ok(Json(notifier.status().await?))
}

async fn cancel_task(
    State(notifier): State<AppState>,
    Path((event_id, player_id)): Path<(Sequence, String)>,
) -> Result<Json<TaskView>, ApiError> {
    match notifier.cancel(event_id, &player_id).await? {
        CancelOutcome::Cancelled(task) => Ok(Json(task.into())),
        CancelOutcome::AlreadyTerminal(state) => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("task {}/{} is already {}", event_id, player_id, state),
        )),
        CancelOutcome::NotFound => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("task {}/{} not found", event_id, player_id),
        )),
    }
}

async fn resume_dispatch(State(notifier): State<AppState>) -> Json<ResumeResponse> {
    Json(ResumeResponse {
        resumed: notifier.resume_dispatch().await,
    })
}
