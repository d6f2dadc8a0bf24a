//! Identity provider client
//!
//! Bearer tokens are checked by asking the provider who they belong to
//! (`GET {base}/auth/v1/user`). The token itself is never logged.

use crate::domain::access::{IdentityProvider, VerifiedIdentity};
use crate::domain::shared::result::Result;
use crate::domain::DomainError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpIdentityConfig {
    pub base_url: String,
    /// Public project key sent next to the user's bearer token
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    role: Option<String>,
}

pub struct HttpIdentityProvider {
    client: Client,
    user_url: String,
    api_key: String,
}

impl HttpIdentityProvider {
    pub fn new(config: HttpIdentityConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(DomainError::Configuration(
                "identity provider URL is required".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Configuration(format!("identity client: {}", e)))?;

        Ok(Self {
            client,
            user_url: format!("{}/auth/v1/user", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity> {
        let response = self
            .client
            .get(&self.user_url)
            .bearer_auth(bearer)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                warn!("Identity provider unreachable: {}", e);
                DomainError::Internal(format!("identity provider request failed: {}", e))
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DomainError::Unauthenticated(
                    "invalid or expired bearer token".to_string(),
                ));
            }
            status => {
                return Err(DomainError::Internal(format!(
                    "identity provider returned HTTP {}",
                    status
                )));
            }
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Internal(format!("identity response: {}", e)))?;
        debug!("Verified identity {}", user.id);

        Ok(VerifiedIdentity {
            subject: user.id,
            email: user.email,
            role: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_url() {
        let provider = HttpIdentityProvider::new(HttpIdentityConfig {
            base_url: "https://auth.example.org/".to_string(),
            api_key: "anon".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(provider.user_url, "https://auth.example.org/auth/v1/user");
    }

    #[test]
    fn test_requires_base_url() {
        let result = HttpIdentityProvider::new(HttpIdentityConfig {
            base_url: " ".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_internal() {
        let provider = HttpIdentityProvider::new(HttpIdentityConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "anon".to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();
        assert!(matches!(
            provider.verify("token").await,
            Err(DomainError::Internal(_))
        ));
    }
}
