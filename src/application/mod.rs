//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - Call lifecycle (start, answer, decline, end, timeout)
//! - Incoming-call notification fan-out
//! - Media and signaling credential issuance

pub mod call_lifecycle;
pub mod credentials;
pub mod fanout;

pub use call_lifecycle::{
    AnsweredCall, CallHistory, CallInvite, CallLifecycleManager, CallSnapshot, CalleeSummary,
    DeclinedCall, StartCall, StartedCall,
};
pub use credentials::{CredentialIssuer, CredentialSettings, TokenValidation};
pub use fanout::{FanoutSettings, IncomingCall, NotificationFanoutLoop, RingTarget};
