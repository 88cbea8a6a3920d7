use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Transport-facing error. Every variant renders the
/// `{success:false, error:{code, message, details}}` envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String, details: Value },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many requests: {message}")]
    TooManyRequests {
        message: String,
        /// Unix timestamp at which the client may retry.
        reset: Option<i64>,
    },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest {
            message: message.into(),
            details: empty_details(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::InvalidRequest { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::InvalidRequest { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "AUTHENTICATION_ERROR",
            AppError::Forbidden(_) => "AUTHORIZATION_ERROR",
            AppError::TooManyRequests { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: Value,
}

fn empty_details() -> Value {
    Value::Object(serde_json::Map::new())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let (message, details, reset) = match self {
            AppError::ValidationError(err) => (
                "Validation failed.".to_string(),
                serde_json::to_value(&err).unwrap_or_else(|_| empty_details()),
                None,
            ),
            AppError::InvalidRequest { message, details } => (message, details, None),
            AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => (msg, empty_details(), None),
            AppError::TooManyRequests { message, reset } => {
                let details = match reset {
                    Some(reset) => serde_json::json!({ "reset": reset }),
                    None => empty_details(),
                };
                (message, details, reset)
            }
            // Internal failures are logged, never echoed to the client.
            AppError::InternalError(err)
            | AppError::DatabaseError(err)
            | AppError::ConfigError(err) => {
                tracing::error!(error = %format!("{:#}", err), "Request failed with internal error");
                (
                    "An unexpected error occurred.".to_string(),
                    empty_details(),
                    None,
                )
            }
        };

        let mut res = (
            status,
            Json(ErrorEnvelope {
                success: false,
                error: ErrorBody {
                    code,
                    message,
                    details,
                },
            }),
        )
            .into_response();

        if let Some(reset) = reset {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let retry_after = (reset - now).max(0);
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                res.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn test_unauthorized_envelope() {
        let res = AppError::Unauthorized("Invalid credentials.".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(res).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
        assert_eq!(body["error"]["message"], "Invalid credentials.");
        assert!(body["error"]["details"].is_object());
    }

    #[tokio::test]
    async fn test_too_many_requests_sets_retry_after() {
        let reset = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + 30;
        let res = AppError::TooManyRequests {
            message: "Rate limit exceeded.".to_string(),
            reset: Some(reset),
        }
        .into_response();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(header::RETRY_AFTER));

        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["error"]["details"]["reset"], reset);
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let res = AppError::DatabaseError(anyhow::anyhow!("connection refused on 10.0.0.3"))
            .into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Forbidden("no".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("missing".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::invalid_request("bad").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
