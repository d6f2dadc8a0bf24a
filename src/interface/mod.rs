//! Interface layer - the HTTP surface
//!
//! This layer handles:
//! - REST endpoints for calls and credentials
//! - Admission control (rate limit, bearer verification)
//! - Response envelopes and error mapping

pub mod api;
