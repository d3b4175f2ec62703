//! Relay state machine: per-client sessions and per-application pools

pub mod pool;
pub mod session;
