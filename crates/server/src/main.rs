use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use server_api::ApiContext;
use session::{ConnectionRegistry, MissingSessionStarter, SessionGuard};
use shared::{
    domain::InstanceId,
    error::ApiError,
    protocol::{
        ChatPresenceRequest, DeleteMessageRequest, DownloadMediaRequest, DownloadMediaResponse,
        EditMessageRequest, ErrorBody, MarkReadRequest, MessageIdResponse, MessageStatusRequest,
        MessageStatusResponse, ReactRequest, SendResult, SuccessEnvelope, TimestampResponse,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

const INSTANCE_HEADER: &str = "x-instance-id";
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type HttpResult<T> = Result<Json<SuccessEnvelope<T>>, (StatusCode, Json<ErrorBody>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let registry = ConnectionRegistry::new();
    warn!("no session starter configured; instances without a live client will report no active session");
    let sessions = SessionGuard::new(registry.clone(), Arc::new(MissingSessionStarter))
        .with_settle_interval(settings.settle_interval());

    let api = ApiContext {
        storage,
        sessions,
        media_root: settings.media_dir.clone(),
    };
    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(
        %addr,
        media_dir = %settings.media_dir.display(),
        settle_ms = settings.session_settle_ms,
        "gateway listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;
    Ok(())
}

async fn shutdown_signal(registry: ConnectionRegistry) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    if registry.is_empty().await {
        info!("shutting down");
        return;
    }
    let instances = registry.instances().await;
    let names: Vec<&str> = instances.iter().map(InstanceId::as_str).collect();
    info!(
        live_sessions = instances.len(),
        instances = %names.join(","),
        "shutting down with live sessions"
    );
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/message/react", post(http_react))
        .route("/message/presence", post(http_presence))
        .route("/message/markread", post(http_mark_read))
        .route("/message/downloadimage", post(http_download_media))
        .route("/message/status", post(http_message_status))
        .route("/message/delete", post(http_delete))
        .route("/message/edit", post(http_edit))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_react(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ReactRequest>, JsonRejection>,
) -> HttpResult<SendResult> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::react(&state.api, &instance, req).await)
}

async fn http_presence(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatPresenceRequest>, JsonRejection>,
) -> HttpResult<TimestampResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::chat_presence(&state.api, &instance, req).await)
}

async fn http_mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MarkReadRequest>, JsonRejection>,
) -> HttpResult<TimestampResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::mark_read(&state.api, &instance, req).await)
}

async fn http_download_media(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DownloadMediaRequest>, JsonRejection>,
) -> HttpResult<DownloadMediaResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::download_media(&state.api, &instance, req).await)
}

async fn http_message_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MessageStatusRequest>, JsonRejection>,
) -> HttpResult<MessageStatusResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::message_status(&state.api, &instance, req).await)
}

async fn http_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<DeleteMessageRequest>, JsonRejection>,
) -> HttpResult<MessageIdResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::delete_for_everyone(&state.api, &instance, req).await)
}

async fn http_edit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> HttpResult<MessageIdResponse> {
    let instance = instance_from_headers(&headers)?;
    let req = request_body(payload)?;
    respond(server_api::edit_message(&state.api, &instance, req).await)
}

fn instance_from_headers(headers: &HeaderMap) -> Result<InstanceId, (StatusCode, Json<ErrorBody>)> {
    let raw = headers
        .get(INSTANCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(reject(ApiError::validation(format!(
            "missing {INSTANCE_HEADER} header"
        ))));
    }

    let instance = InstanceId::new(raw);
    if !instance.is_valid() {
        return Err(reject(ApiError::validation(format!(
            "invalid {INSTANCE_HEADER} header"
        ))));
    }
    Ok(instance)
}

/// Body decode failures surface as 400 `{"error": …}` like other validation errors.
fn request_body<T>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, (StatusCode, Json<ErrorBody>)> {
    payload.map(|Json(req)| req).map_err(|rejection| {
        debug!(status = %rejection.status(), error = %rejection.body_text(), "rejected request body");
        reject(ApiError::validation(rejection.body_text()))
    })
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> HttpResult<T> {
    result.map(|data| Json(SuccessEnvelope::new(data))).map_err(reject)
}

fn reject(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let status = if err.code.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorBody { error: err.message }))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
