//! Error types for the HTTP API.

use agri_market::MarketError;
use agri_proto::ProtoError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A marketplace operation was rejected.
    #[error(transparent)]
    Market(#[from] MarketError),

    /// Malformed path, query or body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// Too many live connections.
    #[error("too many connections: {0} active, limit is {1}")]
    TooManyConnections(usize, usize),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status and machine-readable kind for this error.
    #[must_use]
    pub const fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Market(e) => match e {
                MarketError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                MarketError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                MarketError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                MarketError::DoubleBooking { .. } => (StatusCode::CONFLICT, "double_booking"),
                MarketError::Unavailable { .. } => (StatusCode::CONFLICT, "unavailable"),
                MarketError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                MarketError::InvalidStateTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_state_transition")
                }
                MarketError::DuplicateReview { .. } => (StatusCode::CONFLICT, "duplicate_review"),
                MarketError::PayoutNotReleasable { .. } => {
                    (StatusCode::CONFLICT, "payout_not_releasable")
                }
                MarketError::Persistence(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::TooManyConnections(_, _) => {
                (StatusCode::SERVICE_UNAVAILABLE, "too_many_connections")
            }
            Self::BindFailed(_, _) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_kind();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [("content-type", "application/json")], json).into_response()
    }
}

impl From<ProtoError> for ApiError {
    fn from(err: ProtoError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_proto::{BookingId, EquipmentId};
    use http_body_util::BodyExt;
    use test_case::test_case;

    #[tokio::test]
    async fn test_not_found_error_response() {
        let err = ApiError::from(MarketError::not_found("booking", "abc123"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["error"], "not_found");
        assert_eq!(json["message"], "booking not found: abc123");
    }

    #[tokio::test]
    async fn test_double_booking_error_response() {
        let err = ApiError::from(MarketError::DoubleBooking {
            equipment_id: EquipmentId::new(),
            conflicting: BookingId::new(),
        });
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "double_booking");
    }

    #[test_case(MarketError::Validation("bad".into()), StatusCode::BAD_REQUEST ; "validation")]
    #[test_case(MarketError::Forbidden("no".into()), StatusCode::FORBIDDEN ; "forbidden")]
    #[test_case(MarketError::Conflict("busy".into()), StatusCode::CONFLICT ; "conflict")]
    #[test_case(
        MarketError::InvalidStateTransition { from: "completed".into(), to: "confirmed".into() },
        StatusCode::CONFLICT ;
        "transition"
    )]
    fn test_market_status_mapping(err: MarketError, expected: StatusCode) {
        assert_eq!(ApiError::from(err).status_and_kind().0, expected);
    }

    #[test]
    fn test_proto_error_is_invalid_request() {
        let err = ApiError::from(ProtoError::InvalidBasisPoints(20_000));
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert_eq!(err.status_and_kind().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_too_many_connections_status() {
        let err = ApiError::TooManyConnections(100, 50);
        assert_eq!(err.status_and_kind().0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "too many connections: 100 active, limit is 50");
    }
}
