use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ragscope_core::error::RagscopeError;
use ragscope_core::ids::TraceId;
use ragscope_core::model::metrics::FinalMetrics;
use ragscope_core::model::trace::Trace;
use ragscope_core::query::{
    Completion, ErrorBody, RecordSpanRequest, SessionExport, SessionStats, StartTraceRequest,
    StartTraceResponse,
};
use ragscope_store::TraceStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

#[derive(Clone)]
pub struct AppState {
    pub store: TraceStore,
}

pub fn router(store: TraceStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/traces", post(start_trace))
        .route("/v1/traces/{trace_id}", get(get_trace))
        .route("/v1/traces/{trace_id}/spans", post(record_span))
        .route("/v1/traces/{trace_id}/complete", post(complete_trace))
        .route("/v1/session", get(session_stats).delete(reset_session))
        .route("/v1/export", get(export_session))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(AppState { store })
}

pub async fn serve(store: TraceStore, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind HTTP listener {addr}"))?;
    axum::serve(listener, router(store))
        .await
        .context("HTTP server failed")
}

pub struct ApiError(RagscopeError);

impl From<RagscopeError> for ApiError {
    fn from(err: RagscopeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &RagscopeError) -> StatusCode {
    match err {
        RagscopeError::UnknownTrace(_) => StatusCode::NOT_FOUND,
        RagscopeError::TraceNotActive { .. } => StatusCode::CONFLICT,
        RagscopeError::InvalidMetrics(_) | RagscopeError::InvalidTokenCount { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RagscopeError::Config(_) | RagscopeError::Parse(_) => StatusCode::BAD_REQUEST,
        RagscopeError::Export(_) | RagscopeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn start_trace(
    State(state): State<AppState>,
    Json(req): Json<StartTraceRequest>,
) -> (StatusCode, Json<StartTraceResponse>) {
    let trace_id = state.store.start_trace(req.query);
    (StatusCode::CREATED, Json(StartTraceResponse { trace_id }))
}

async fn record_span(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Json(req): Json<RecordSpanRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .record_span(&TraceId::new(trace_id), &req.operation, &req.metrics)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Json(completion): Json<Completion>,
) -> Result<Json<FinalMetrics>, ApiError> {
    let metrics = state
        .store
        .complete_trace(&TraceId::new(trace_id), completion)?;
    Ok(Json(metrics))
}

async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Trace>, ApiError> {
    Ok(Json(state.store.get_trace(&TraceId::new(trace_id))?))
}

async fn session_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.store.session_stats())
}

async fn reset_session(State(state): State<AppState>) -> StatusCode {
    state.store.reset_session();
    StatusCode::NO_CONTENT
}

async fn export_session(State(state): State<AppState>) -> Json<SessionExport> {
    Json(state.store.export_session())
}
