use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http::StatusCode;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{debug_span, info};

use crate::api_error::Result;
use crate::middleware::{self, CorrelationId, PresentedToken, RequireToken};
use crate::task::{Task, TaskEvent};

use super::{DeregisterRequest, RegisterRequest, Service};

type ApiState = Arc<Service>;

pub fn make_router(service: ApiState) -> Router {
    let guarded = Router::new()
        .route("/node", get(h_node_list))
        .route("/node/register", post(h_node_register))
        .route("/node/deregister", post(h_node_deregister))
        .route("/tasks", post(h_tasks_post).get(h_tasks_get))
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

async fn h_node_list(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.node_views())
}

async fn h_node_register(
    State(state): State<ApiState>,
    Extension(cid): Extension<CorrelationId>,
    Extension(presented): Extension<PresentedToken>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(mut req) = body?;
    // The node is called back with the bearer the agent presented here.
    if !presented.0.is_empty() {
        req.token = presented.0.clone();
    }
    state.on_register(&cid, req).await?;
    Ok((StatusCode::CREATED, "OK"))
}

async fn h_node_deregister(
    State(state): State<ApiState>,
    body: Result<Json<DeregisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body?;
    state.deregister(&req);
    Ok((StatusCode::OK, "OK"))
}

async fn h_tasks_post(
    State(state): State<ApiState>,
    Extension(cid): Extension<CorrelationId>,
    body: Result<Json<Task>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(task) = body?;
    // Accepted as soon as it decodes; dispatch happens in the background.
    state.add_task(&cid, TaskEvent::new(task));
    Ok(StatusCode::CREATED)
}

async fn h_tasks_get(Extension(cid): Extension<CorrelationId>) -> impl IntoResponse {
    info!(correlation_id = %cid, "get tasks");
    "get tasks"
}
