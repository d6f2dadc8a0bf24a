//! Shared handler state

use super::dto::ApiError;
use crate::application::{CallLifecycleManager, CredentialIssuer};
use crate::domain::access::{FixedWindowRateLimiter, IdentityProvider};
use crate::domain::call::CallRepository;
use crate::domain::DomainError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub calls: Arc<CallLifecycleManager>,
    pub credentials: Arc<CredentialIssuer>,
    /// Probed by `/api/status`
    pub call_store: Arc<dyn CallRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    pub push_enabled: bool,
    pub expose_errors: bool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wrap an error for the client, sanitized unless in development
    pub fn reject(&self, error: DomainError) -> ApiError {
        ApiError::new(error, self.expose_errors)
    }
}
