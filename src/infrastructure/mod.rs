//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Repository implementations (PostgreSQL and in-memory)
//! - Token signing
//! - Push delivery and identity provider HTTP clients

pub mod identity;
pub mod persistence;
pub mod push;
pub mod signing;
