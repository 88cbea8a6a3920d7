use service_core::error::AppError;
use thiserror::Error;

/// Closed set of outcomes every security operation can fail with. Carries no
/// transport detail; `AppError` maps it onto the wire envelope.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        /// Unix timestamp at which the window or lockout ends.
        reset: i64,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation { message: String, errors: Vec<String> },

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Uniform failure for anything wrong with a presented token.
    pub fn invalid_token() -> Self {
        ServiceError::Authentication("Invalid or expired token.".to_string())
    }

    pub fn invalid_credentials() -> Self {
        ServiceError::Authentication("Invalid credentials.".to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Authentication(msg) => AppError::Unauthorized(msg),
            ServiceError::Authorization(msg) => AppError::Forbidden(msg),
            ServiceError::RateLimited { message, reset } => AppError::TooManyRequests {
                message,
                reset: Some(reset),
            },
            ServiceError::NotFound(msg) => AppError::NotFound(msg),
            ServiceError::Validation { message, errors } => AppError::InvalidRequest {
                message,
                details: serde_json::json!({ "errors": errors }),
            },
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_mapping_to_app_error() {
        let cases = [
            (ServiceError::invalid_token(), StatusCode::UNAUTHORIZED),
            (
                ServiceError::Authorization("no".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                ServiceError::RateLimited {
                    message: "slow down".into(),
                    reset: 0,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ServiceError::NotFound("gone".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::validation("bad"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Database(anyhow::anyhow!("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }
}
