//! Wire envelope and error mapping

use crate::domain::DomainError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every response body is wrapped in this envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            retry_after: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String, code: &'static str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            code: Some(code),
            retry_after: None,
        }
    }
}

/// A `DomainError` on its way to the client
#[derive(Debug)]
pub struct ApiError {
    error: DomainError,
    /// Development builds show internal diagnostics
    expose_details: bool,
}

impl ApiError {
    pub fn new(error: DomainError, expose_details: bool) -> Self {
        Self {
            error,
            expose_details,
        }
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.error)
    }

    fn message(&self) -> String {
        match &self.error {
            e if e.is_sensitive() && !self.expose_details => match e {
                DomainError::Configuration(_) => "Service is not configured".to_string(),
                _ => "Internal server error".to_string(),
            },
            DomainError::Validation(m)
            | DomainError::NotFound(m)
            | DomainError::Conflict(m)
            | DomainError::Unauthenticated(m)
            | DomainError::Forbidden(m)
            | DomainError::Configuration(m)
            | DomainError::Internal(m) => m.clone(),
            e @ DomainError::RateLimited { .. } => e.to_string(),
        }
    }
}

pub fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        DomainError::Configuration(_) | DomainError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ApiResponse::error(self.message(), self.error.code());

        let retry_after = match self.error {
            DomainError::RateLimited { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        };
        body.retry_after = retry_after;

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
