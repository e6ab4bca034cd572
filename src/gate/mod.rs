//! Request-facing admission: client identity, decisions and replay.

mod client;
mod replay;
mod service;

pub use client::{ClientKey, ClientKeyResolver, UNKNOWN_CLIENT};
pub use replay::{replay, ReplayStats};
pub use service::{AdmissionGate, Decision, DenyReason, Rejection, RATE_LIMITED};
