//! Call bounded context - manages the lifecycle of intercom calls

pub mod aggregate;
pub mod entity;
pub mod repository;
pub mod value_object;

pub use aggregate::Call;
pub use entity::Participant;
pub use repository::{
    CallFilters, CallRepository, CallTransition, ParticipantScope, ParticipantTransition,
};
pub use value_object::{CallStatus, ParticipantStatus};
