use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hearth_domain::CorrelationId;
use hearth_engine::EngineError;
use hearth_store::StoreError;
use serde::Serialize;
use serde_json::json;

/// Closed error-code vocabulary exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    SafetyBlock,
    InfrastructureDown,
    InternalError,
}

/// Structured problem document: the single failure shape every endpoint
/// returns, plus the correlation id for tracing.
#[derive(Debug)]
pub struct Problem {
    pub status: StatusCode,
    pub error_code: ErrorCode,
    pub title: String,
    pub detail: String,
    pub correlation_id: Option<CorrelationId>,
}

impl Problem {
    fn new(
        status: StatusCode,
        error_code: ErrorCode,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Problem {
            status,
            error_code,
            title: title.into(),
            detail: detail.into(),
            correlation_id: None,
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Problem::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError,
            "invalid request",
            detail,
        )
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Problem::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, "not found", detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Problem::new(StatusCode::CONFLICT, ErrorCode::Conflict, "conflict", detail)
    }

    pub fn safety_block(detail: impl Into<String>) -> Self {
        Problem::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::SafetyBlock,
            "refused by safety rules",
            detail,
        )
    }

    pub fn infrastructure(detail: impl Into<String>) -> Self {
        Problem::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InfrastructureDown,
            "infrastructure unavailable",
            detail,
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Problem::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "internal error",
            detail,
        )
    }

    pub fn with_correlation(mut self, correlation: CorrelationId) -> Self {
        self.correlation_id = Some(correlation);
        self
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "title": self.title,
            "status": self.status.as_u16(),
            "detail": self.detail,
            "errorCode": self.error_code,
            "correlationId": self.correlation_id,
        }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for Problem {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(detail) => Problem::not_found(detail),
            StoreError::Conflict { .. } => Problem::conflict(e.to_string()),
            StoreError::DeviceAlreadyAssigned { .. } => Problem::conflict(e.to_string()),
            StoreError::Serialization(_)
            | StoreError::InvariantViolation(_)
            | StoreError::Internal(_) => Problem::internal(e.to_string()),
        }
    }
}

impl From<EngineError> for Problem {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Domain(inner) => Problem::validation(inner.to_string()),
            EngineError::Store(inner) => inner.into(),
            EngineError::Validation(detail) => Problem::validation(detail),
            EngineError::NotFound(detail) => Problem::not_found(detail),
            EngineError::SafetyBlock { rule_id, reason } => {
                Problem::safety_block(format!("{reason} (rule {rule_id})"))
            }
            EngineError::InfrastructureDown(detail) => Problem::infrastructure(detail),
            EngineError::Topic(detail) => Problem::validation(format!("bad topic: {detail}")),
            EngineError::BusClosed | EngineError::Dispatch(_) => {
                Problem::infrastructure(e.to_string())
            }
        }
    }
}
