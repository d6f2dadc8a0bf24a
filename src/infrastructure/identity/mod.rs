//! Identity provider adapters

pub mod http;

pub use http::{HttpIdentityConfig, HttpIdentityProvider};
