use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use fuente_shared::constants::RATE_LIMITED_NOTICE;
use fuente_shared::protocol::ServerEvent;
use fuente_shared::{FingerprintError, ProtocolError};

/// Failures of the matching and relay engine.
///
/// Every variant is reported to the originating connection as a typed
/// outbound event; none of them close the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Not authenticated")]
    Authentication,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Peer is no longer available")]
    PeerUnavailable,

    #[error("Conversation not found or frozen")]
    ConversationUnavailable,

    #[error("Invalid recovery phrase")]
    RecoveryPhraseInvalid,

    #[error("Already in an active conversation")]
    AlreadyInConversation,

    #[error("Too many identities created on this device")]
    DeviceLimitReached,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Outbound event reporting this error to the client.
    pub fn to_event(&self) -> ServerEvent {
        match self {
            EngineError::Authentication => ServerEvent::AuthError {
                message: "Invalid user ID".to_string(),
            },
            EngineError::RateLimited { retry_after_secs } => ServerEvent::RateLimited {
                message: RATE_LIMITED_NOTICE.to_string(),
                retry_after_seconds: *retry_after_secs,
            },
            EngineError::PeerUnavailable => ServerEvent::PeerUnavailable {
                message: self.to_string(),
            },
            EngineError::ConversationUnavailable => {
                ServerEvent::error("conversation_unavailable", self.to_string())
            }
            EngineError::RecoveryPhraseInvalid => {
                ServerEvent::error("recovery_phrase_invalid", self.to_string())
            }
            EngineError::AlreadyInConversation => {
                ServerEvent::error("already_in_conversation", self.to_string())
            }
            EngineError::DeviceLimitReached => {
                ServerEvent::error("device_limit_reached", self.to_string())
            }
            EngineError::InvalidRequest(_) => ServerEvent::error("invalid_request", self.to_string()),
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(e: ProtocolError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}

impl From<FingerprintError> for EngineError {
    fn from(e: FingerprintError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("No identity found")]
    MissingIdentity,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Engine(EngineError::RecoveryPhraseInvalid) => StatusCode::NOT_FOUND,
            ServerError::Engine(EngineError::DeviceLimitReached) => StatusCode::FORBIDDEN,
            ServerError::Engine(EngineError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Engine(EngineError::Authentication) => StatusCode::UNAUTHORIZED,
            ServerError::Engine(_) => StatusCode::BAD_REQUEST,
            ServerError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ServerError::UserNotFound => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
