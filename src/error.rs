// Application Error Types
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse},
};

use crate::auth::AuthError;
use crate::data::DataError;
use crate::session::SessionError;
use crate::templates::TemplateError;

/// Request-level failure with a status code and a message that is safe to show.
#[derive(Debug)]
pub enum AppError {
    // 400 Bad Request
    BadRequest(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (backend or identity provider failures)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::InternalServerError(_) => 500,
            AppError::BadGateway(_) => 502,
            AppError::ServiceUnavailable(_) => 503,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::InternalServerError(msg)
            | AppError::BadGateway(msg)
            | AppError::ServiceUnavailable(msg) => msg,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        AppError::InternalServerError(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        AppError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        AppError::ServiceUnavailable(message.into())
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::Filter(e) => {
                // Filters are built by controllers, so this is a programming error
                tracing::error!("Invalid query: {}", e);
                AppError::internal_server_error("An error occurred while processing your request")
            }
            DataError::Transport(e) => {
                tracing::error!("Backend unreachable: {}", e);
                AppError::service_unavailable("The data service is temporarily unavailable")
            }
            DataError::Status { status, body } => {
                tracing::error!("Backend rejected request ({}): {}", status, body);
                AppError::bad_gateway("The data service rejected the request")
            }
            DataError::Sqlx(e) => {
                tracing::error!("SQLx error: {}", e);
                AppError::internal_server_error("Database error occurred")
            }
            DataError::Decode(msg) | DataError::Config(msg) => {
                tracing::error!("Backend error: {}", msg);
                AppError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Data(e) => e.into(),
            AuthError::Transport(e) => {
                tracing::error!("Identity provider unreachable: {}", e);
                AppError::service_unavailable("The authentication service is temporarily unavailable")
            }
            AuthError::Password(e) => {
                tracing::error!("Password hashing failed: {}", e);
                AppError::internal_server_error("An error occurred while processing your request")
            }
            AuthError::Decode(msg) => {
                tracing::error!("Identity provider error: {}", msg);
                AppError::bad_gateway("The authentication service returned an unexpected response")
            }
            other => AppError::bad_request(other.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        tracing::error!("Session storage error: {}", err);
        AppError::internal_server_error("Session storage is unavailable")
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        tracing::error!("{}", err);
        AppError::internal_server_error("Page could not be rendered")
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

// Bare response for failures outside the front controller; pages render their own error view
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = format!(
            "<!DOCTYPE html><html><body><h1>{}</h1><p>{}</p></body></html>",
            status.as_u16(),
            crate::security::escape_html_once(self.message())
        );
        (status, Html(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_hide_details() {
        let err: AppError = DataError::Status { status: 500, body: "relation \"x\" does not exist".into() }.into();
        assert_eq!(err.status_code(), 502);
        assert!(!err.message().contains("relation"));
        assert!(matches!(err, AppError::BadGateway(_)));
    }

    #[test]
    fn auth_rejections_keep_user_facing_message() {
        let err: AppError = AuthError::EmailTaken.into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message(), "Email address is already registered");
    }
}
