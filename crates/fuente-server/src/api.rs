use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use fuente_shared::constants::{IDENTITY_COOKIE_MAX_AGE_SECS, IDENTITY_COOKIE_NAME};
use fuente_shared::fingerprint::DeviceSignals;
use fuente_shared::UserId;

use crate::config::ServerConfig;
use crate::engine::TrustSummary;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::ws::ws_handler;

const CREATED_MESSAGE: &str =
    "Save your recovery phrase! You'll need it to access your account on other devices.";
const RECOVERED_MESSAGE: &str = "Identity recovered successfully";

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/identity/create", post(create_identity))
        .route("/api/identity/recover", post(recover_identity))
        .route("/api/user/trust", get(user_trust))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The web client sends the identity cookie, so its origin is allowed with
/// credentials. An unparseable origin falls back to any origin without them.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match HeaderValue::from_str(&config.client_url) {
        Ok(origin) => base.allow_origin(origin).allow_credentials(true),
        Err(_) => {
            warn!(client_url = %config.client_url, "Unusable CLIENT_URL, allowing any origin");
            base.allow_origin(Any)
        }
    }
}

/// Clients send either the joined fingerprint string or its components.
#[derive(Deserialize)]
#[serde(untagged)]
enum Fingerprint {
    Raw(String),
    Signals(DeviceSignals),
}

impl Fingerprint {
    fn into_raw(self) -> String {
        match self {
            Fingerprint::Raw(raw) => raw,
            Fingerprint::Signals(signals) => signals.to_raw(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIdentityRequest {
    device_fingerprint: Option<Fingerprint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoverIdentityRequest {
    recovery_phrase: Option<String>,
    device_fingerprint: Option<Fingerprint>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIdentityResponse {
    user_id: UserId,
    recovery_phrase: String,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecoverIdentityResponse {
    user_id: UserId,
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Unix epoch milliseconds
    timestamp: i64,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
    identities: usize,
    available: usize,
    conversations: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp_millis(),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let stats = state.gateway.stats().await;
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: stats.connections,
        identities: stats.identities,
        available: stats.available,
        conversations: stats.conversations,
    })
}

async fn create_identity(
    State(state): State<AppState>,
    Json(req): Json<CreateIdentityRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let fingerprint = req
        .device_fingerprint
        .map(Fingerprint::into_raw)
        .ok_or_else(|| ServerError::BadRequest("Device fingerprint required".into()))?;

    let created = state
        .gateway
        .with_engine(|engine| engine.create_identity(&fingerprint))
        .await?;

    info!(user = %created.user_id.short(), "Identity issued via API");

    let cookie = identity_cookie(&created.user_id, &state.config);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(CreateIdentityResponse {
            user_id: created.user_id,
            recovery_phrase: created.recovery_phrase,
            message: CREATED_MESSAGE,
        }),
    ))
}

async fn recover_identity(
    State(state): State<AppState>,
    Json(req): Json<RecoverIdentityRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let (Some(phrase), Some(fingerprint)) = (
        req.recovery_phrase,
        req.device_fingerprint.map(Fingerprint::into_raw),
    ) else {
        return Err(ServerError::BadRequest(
            "Recovery phrase and device fingerprint required".into(),
        ));
    };

    let user_id = state
        .gateway
        .with_engine(|engine| engine.recover_identity(&phrase, &fingerprint))
        .await?;

    let cookie = identity_cookie(&user_id, &state.config);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(RecoverIdentityResponse {
            user_id,
            message: RECOVERED_MESSAGE,
        }),
    ))
}

async fn user_trust(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<TrustSummary>, ServerError> {
    let user_id = cookie_user_id(&headers).ok_or(ServerError::MissingIdentity)?;

    state
        .gateway
        .with_engine(|engine| engine.trust_summary(&user_id))
        .await
        .map(Json)
        .ok_or(ServerError::UserNotFound)
}

fn identity_cookie(user_id: &UserId, config: &ServerConfig) -> String {
    let mut cookie = format!(
        "{IDENTITY_COOKIE_NAME}={user_id}; HttpOnly; SameSite=Strict; Max-Age={IDENTITY_COOKIE_MAX_AGE_SECS}; Path=/"
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The identity cookie's value, if present and a well-formed id.
fn cookie_user_id(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == IDENTITY_COOKIE_NAME)
        .and_then(|(_, value)| value.parse().ok())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
