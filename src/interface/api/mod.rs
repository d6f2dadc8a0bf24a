//! HTTP API: call lifecycle, credential issuance and service endpoints

pub mod access_gate;
pub mod calls_handler;
pub mod dto;
pub mod extract;
pub mod health_handler;
pub mod metrics_handler;
pub mod router;
pub mod state;
pub mod tokens_handler;

pub use dto::{ApiError, ApiResponse};
pub use extract::ApiJson;
pub use metrics_handler::init_metrics;
pub use router::build_router;
pub use state::AppState;
