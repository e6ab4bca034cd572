//! Tollgate - Adaptive Per-Client Admission Control
//!
//! This crate decides, per client and per endpoint tier, whether a request may
//! proceed. Each tier keeps an in-process registry of token buckets or sliding
//! windows keyed by client identity, with idle entries reaped in the
//! background so memory stays bounded without any external store.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
