//! Push delivery adapters

pub mod expo;

pub use expo::{is_expo_push_token, ExpoPushConfig, ExpoPushGateway, DEFAULT_EXPO_ENDPOINT};
