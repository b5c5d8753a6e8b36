//! Tavola API - Operator HTTP surface
//!
//! Health probes, backlog statistics, the maintenance trigger for the
//! reconciliation sweeps, queue cancellation and an outbox submission
//! endpoint.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
