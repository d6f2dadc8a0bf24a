//! Admission control for credential endpoints
//!
//! Rate limiting runs first so unauthenticated floods are throttled before
//! any identity-provider round trip.

use super::state::AppState;
use crate::domain::access::{client_key, RateDecision};
use crate::domain::DomainError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use std::net::SocketAddr;
use tracing::{debug, warn};

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn access_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let forwarded_for = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let key = client_key(forwarded_for, peer);

    let decision = state.rate_limiter.check(&key);
    if let Some(retry_after_secs) = decision.retry_after_secs() {
        counter!("intercom_rate_limited_total").increment(1);
        warn!("Rate limit exceeded for {} on {}", key, request.uri().path());
        return state
            .reject(DomainError::RateLimited { retry_after_secs })
            .into_response();
    }

    let Some(bearer) = bearer_token(&request) else {
        return state
            .reject(DomainError::Unauthenticated(
                "missing bearer token".to_string(),
            ))
            .into_response();
    };

    let identity = match state.identity.verify(bearer).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!("Bearer rejected for {}: {}", key, e);
            return state.reject(e).into_response();
        }
    };

    if let RateDecision::Allowed { remaining } = decision {
        debug!("{} admitted as {} ({} left)", key, identity.subject, remaining);
    }
    request.extensions_mut().insert(identity);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/tokens/generate");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&request(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&request(Some("bearer  xyz "))), Some("xyz"));
        assert_eq!(bearer_token(&request(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request(Some("Bearer "))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }
}
