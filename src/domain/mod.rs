//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: the Call and its participants
//! - Value Objects: identifiers, statuses, credential policy
//! - Ports: repositories, directory, push, identity and token signing

pub mod access;
pub mod call;
pub mod credential;
pub mod directory;
pub mod push;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
