//! Intercom - building intercom call core
//!
//! Doormen and residents place calls to each other; every eligible callee is
//! rung by push until one answers, all decline, or the ring deadline passes.
//! The service also signs the media and signaling credentials clients need
//! to join a call's channel.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
