//! Expo push API client
//!
//! One HTTP request per message; the fan-out loop owns retry timing.

use crate::domain::push::{
    redact_device_address, PushGateway, PushMessage, PushPriority, PushReceipt,
};
use crate::domain::shared::result::Result;
use crate::domain::DomainError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EXPO_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone)]
pub struct ExpoPushConfig {
    pub endpoint: String,
    /// Enhanced push security token, if the project requires one
    pub access_token: Option<String>,
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for ExpoPushConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_EXPO_ENDPOINT.to_string(),
            access_token: None,
            enabled: true,
            timeout: Duration::from_secs(5),
        }
    }
}

/// `ExponentPushToken[...]`, `ExpoPushToken[...]` or a bare UUID
pub fn is_expo_push_token(token: &str) -> bool {
    let bracketed = ["ExponentPushToken[", "ExpoPushToken["]
        .iter()
        .any(|prefix| token.starts_with(prefix))
        && token.ends_with(']')
        && !token.ends_with("[]");
    bracketed || uuid::Uuid::parse_str(token).is_ok()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
    priority: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<&'a str>,
}

impl<'a> From<&'a PushMessage> for ExpoMessage<'a> {
    fn from(message: &'a PushMessage) -> Self {
        let priority = match message.priority {
            PushPriority::Default => "default",
            PushPriority::Normal => "normal",
            PushPriority::High => "high",
        };
        Self {
            to: &message.to,
            title: &message.title,
            body: &message.body,
            data: &message.data,
            priority,
            sound: message.sound.as_deref(),
            channel_id: message.channel_id.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Option<ExpoTicket>,
    #[serde(default)]
    errors: Vec<ExpoError>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    id: Option<String>,
    message: Option<String>,
    details: Option<ExpoTicketDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicketDetails {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpoError {
    code: Option<String>,
    message: Option<String>,
}

pub struct ExpoPushGateway {
    client: Client,
    config: ExpoPushConfig,
}

impl ExpoPushGateway {
    pub fn new(config: ExpoPushConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Configuration(format!("push client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn interpret(response: ExpoResponse, to: &str) -> Result<PushReceipt> {
        if let Some(error) = response.errors.first() {
            return Err(DomainError::Internal(format!(
                "push rejected: {} {}",
                error.code.as_deref().unwrap_or("unknown"),
                error.message.as_deref().unwrap_or_default()
            )));
        }

        let ticket = response
            .data
            .ok_or_else(|| DomainError::Internal("push response without ticket".to_string()))?;
        if ticket.status == "ok" {
            return Ok(PushReceipt {
                ticket_id: ticket.id,
            });
        }

        let reason = ticket.details.and_then(|d| d.error);
        match reason.as_deref() {
            // The device is gone; dialing it again cannot succeed
            Some("DeviceNotRegistered") => Err(DomainError::Validation(format!(
                "device {} is no longer registered",
                redact_device_address(to)
            ))),
            _ => Err(DomainError::Internal(format!(
                "push ticket error: {}",
                ticket
                    .message
                    .or(reason)
                    .unwrap_or_else(|| "unknown".to_string())
            ))),
        }
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<PushReceipt> {
        if !self.config.enabled {
            return Err(DomainError::Validation("push delivery is disabled".to_string()));
        }
        if !is_expo_push_token(&message.to) {
            return Err(DomainError::Validation(format!(
                "not a push token: {}",
                redact_device_address(&message.to)
            )));
        }

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Accept", "application/json")
            .json(&ExpoMessage::from(message));
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::Internal(format!("push request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::Internal(format!(
                "push endpoint returned HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ExpoResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Internal(format!("push response: {}", e)))?;
        let receipt = Self::interpret(parsed, &message.to)?;
        debug!(
            "Push accepted for {} (ticket {:?})",
            redact_device_address(&message.to),
            receipt.ticket_id
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::push::INTERCOM_CHANNEL_ID;
    use serde_json::json;

    fn message(to: &str) -> PushMessage {
        PushMessage {
            to: to.to_string(),
            title: "Intercom call".to_string(),
            body: "Front desk is calling apartment 101".to_string(),
            data: json!({"type": "intercom_call"}),
            priority: PushPriority::High,
            sound: Some("default".to_string()),
            channel_id: Some(INTERCOM_CHANNEL_ID.to_string()),
        }
    }

    #[test]
    fn test_push_token_format() {
        assert!(is_expo_push_token("ExponentPushToken[xxxxxxxxxxxxxxxxxxxxxx]"));
        assert!(is_expo_push_token("ExpoPushToken[abc]"));
        assert!(is_expo_push_token("5f3c2a1e-9b8d-4c7e-a6f5-0123456789ab"));
        assert!(!is_expo_push_token("ExponentPushToken[]"));
        assert!(!is_expo_push_token("fcm:abcdef"));
        assert!(!is_expo_push_token(""));
    }

    #[test]
    fn test_wire_message() {
        let msg = message("ExpoPushToken[abc]");
        let wire = serde_json::to_value(ExpoMessage::from(&msg)).unwrap();
        assert_eq!(wire["priority"], "high");
        assert_eq!(wire["channelId"], INTERCOM_CHANNEL_ID);
        assert_eq!(wire["data"]["type"], "intercom_call");
    }

    #[test]
    fn test_interpret_tickets() {
        let ok: ExpoResponse =
            serde_json::from_value(json!({"data": {"status": "ok", "id": "ticket-1"}})).unwrap();
        assert_eq!(
            ExpoPushGateway::interpret(ok, "ExpoPushToken[abc]").unwrap(),
            PushReceipt {
                ticket_id: Some("ticket-1".to_string())
            }
        );

        let gone: ExpoResponse = serde_json::from_value(json!({
            "data": {"status": "error", "message": "gone", "details": {"error": "DeviceNotRegistered"}}
        }))
        .unwrap();
        assert!(matches!(
            ExpoPushGateway::interpret(gone, "ExpoPushToken[abc]"),
            Err(DomainError::Validation(_))
        ));

        let throttled: ExpoResponse = serde_json::from_value(json!({
            "errors": [{"code": "TOO_MANY_REQUESTS", "message": "slow down"}]
        }))
        .unwrap();
        assert!(matches!(
            ExpoPushGateway::interpret(throttled, "ExpoPushToken[abc]"),
            Err(DomainError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_before_network() {
        let gateway = ExpoPushGateway::new(ExpoPushConfig {
            endpoint: "http://127.0.0.1:9/unreachable".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            gateway.send(&message("not-a-token")).await,
            Err(DomainError::Validation(_))
        ));

        let disabled = ExpoPushGateway::new(ExpoPushConfig {
            enabled: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!disabled.is_enabled());
        assert!(matches!(
            disabled.send(&message("ExpoPushToken[abc]")).await,
            Err(DomainError::Validation(_))
        ));
    }
}
