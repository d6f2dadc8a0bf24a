//! Push notification port

use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Android notification channel used for incoming-call alerts
pub const INTERCOM_CHANNEL_ID: &str = "intercom-call";

/// Delivery priority of a push message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPriority {
    Default,
    Normal,
    High,
}

/// One notification addressed to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub priority: PushPriority,
    pub sound: Option<String>,
    pub channel_id: Option<String>,
}

/// Result of a delivery attempt as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub ticket_id: Option<String>,
}

/// Push gateway abstraction
///
/// Implementations must not retry on their own: the fan-out loop calls
/// again on the next tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<PushReceipt>;
}

/// Shorten a device address for logs
pub fn redact_device_address(address: &str) -> String {
    let visible: String = address.chars().take(16).collect();
    if visible.len() < address.len() {
        format!("{}...", visible)
    } else {
        visible
    }
}
