//! WiFi connectivity for the gateway: a supervisor that drives the link
//! state machine, a provisioning portal served while no usable credentials
//! exist, and a bounded HTTPS exchange client for outbound API calls.

pub mod arbiter;
pub mod client;
pub mod config;
pub mod portal;
pub mod runtime;
pub mod store;
pub mod supervisor;
pub mod types;
