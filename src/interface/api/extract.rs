//! Request body extraction that fails with the standard envelope

use super::dto::ApiError;
use crate::domain::DomainError;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

/// `Json<T>` whose rejections answer as `VALIDATION_ERROR`
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::new(invalid_body(&rejection), false)),
        }
    }
}

fn invalid_body(rejection: &JsonRejection) -> DomainError {
    DomainError::Validation(format!("Invalid request body: {}", rejection.body_text()))
}
