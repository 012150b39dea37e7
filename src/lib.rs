//! Gatekeeper - Per-Key Request Admission Control
//!
//! This crate decides, for each request identified by a client and a resource
//! key, whether to admit it under an "N requests per window" policy. Each
//! (client, resource) pair gets its own fixed-window limiter that locks out
//! for good once the limit is exceeded, until a background sweep evicts it.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
