// API error responses

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::ledger::LedgerError;
use crate::proxy::ProxyError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("insufficient coins: balance {balance}, generation costs {cost}")]
    PaymentRequired { balance: u64, cost: u64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// JSON body extractor whose parse failures use the API error format
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// (status, error type, error code)
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_request"),
            ApiError::PaymentRequired { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "invalid_request_error",
                "insufficient_coins",
            ),
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidUserId(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_user_id")
                }
                LedgerError::InsufficientCoins { .. } => {
                    (StatusCode::CONFLICT, "invalid_request_error", "insufficient_coins")
                }
                LedgerError::Overflow(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error", "balance_overflow")
                }
                LedgerError::Conflict(_) => (StatusCode::CONFLICT, "ledger_error", "write_conflict"),
                LedgerError::Http(_) | LedgerError::Remote { .. } => {
                    (StatusCode::BAD_GATEWAY, "ledger_error", "remote_store_error")
                }
                LedgerError::Database(_) | LedgerError::Corrupt { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", "storage_error")
                }
            },
            ApiError::Proxy(err) => match err {
                ProxyError::InvalidRequest(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_request")
                }
                ProxyError::ProviderNotConfigured(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream_error",
                    "provider_not_configured",
                ),
                ProxyError::Upstream { status: 429, .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "upstream_error", "rate_limited")
                }
                ProxyError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error", "upstream_failed"),
                ProxyError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream_error", "upstream_timeout"),
                ProxyError::Transport { .. } => {
                    (StatusCode::BAD_GATEWAY, "upstream_error", "upstream_unreachable")
                }
                ProxyError::MalformedResponse { .. } => {
                    (StatusCode::BAD_GATEWAY, "upstream_error", "malformed_response")
                }
                ProxyError::SchemaValidation { .. } => {
                    (StatusCode::BAD_GATEWAY, "upstream_error", "schema_validation_failed")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.classify();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, message);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, message);
        }

        let mut body = json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": code
            }
        });
        if let ApiError::Proxy(ProxyError::SchemaValidation { errors, .. }) = &self {
            body["error"]["details"] = json!(errors);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Provider;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::PaymentRequired { balance: 1, cost: 2 }, StatusCode::PAYMENT_REQUIRED),
            (LedgerError::InvalidUserId("a b".into()).into(), StatusCode::BAD_REQUEST),
            (
                LedgerError::InsufficientCoins { user_id: "u".into(), balance: 0, delta: -1 }.into(),
                StatusCode::CONFLICT,
            ),
            (ProxyError::ProviderNotConfigured(Provider::Gemini).into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                ProxyError::Upstream { provider: Provider::OpenAI, status: 429, body: String::new() }.into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ProxyError::Upstream { provider: Provider::OpenAI, status: 500, body: String::new() }.into(),
                StatusCode::BAD_GATEWAY,
            ),
            (ProxyError::Timeout(Provider::OpenRouter).into(), StatusCode::GATEWAY_TIMEOUT),
            (LedgerError::Conflict("u".into()).into(), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
