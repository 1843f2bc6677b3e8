use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http::StatusCode;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Instrument, debug_span, error_span};

use crate::api_error::Result;
use crate::middleware::{self, CorrelationId, RequireToken};
use crate::task::TaskEvent;

use super::Service;

type ApiState = Arc<Service>;

pub fn make_router(service: ApiState) -> Router {
    let guarded = Router::new()
        .route("/verify", get(h_verify))
        .route("/tasks", post(h_tasks_post).get(h_tasks_get))
        .route("/stats", get(h_stats))
        .route("/labels", get(h_labels))
        .route_layer(axum::middleware::from_fn_with_state(
            RequireToken(service.api_token()),
            middleware::require_api_token,
        ));

    let healthz = Router::new()
        .route("/healthz/liveness", get(h_liveness))
        .route("/healthz/readiness", get(h_readiness));

    Router::new()
        .nest("/api/v1", guarded.merge(healthz))
        .with_state(service)
        .layer(axum::middleware::from_fn(middleware::correlation_id))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();
                    debug_span!("request", %method, %uri)
                })
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CatchPanicLayer::new())
}

async fn h_liveness() -> impl IntoResponse {
    StatusCode::OK
}

async fn h_readiness() -> impl IntoResponse {
    StatusCode::OK
}

/// Answers 200 iff the auth middleware let the request through, which is
/// exactly what the coordinator's reverse verification needs.
async fn h_verify() -> impl IntoResponse {
    StatusCode::OK
}

async fn h_tasks_post(
    State(state): State<ApiState>,
    Extension(cid): Extension<CorrelationId>,
    body: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(event) = body?;
    state
        .start_task(&event.task)
        .instrument(error_span!("start_task", correlation_id = %cid, task_id = %event.task.id))
        .await?;
    Ok(StatusCode::CREATED)
}

async fn h_tasks_get() -> impl IntoResponse {
    StatusCode::OK
}

async fn h_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.collect_stats().await)
}

async fn h_labels(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.labels())
}
