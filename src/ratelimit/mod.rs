//! Admission control: per-visitor limiters, their registry, and eviction.

mod backend;
mod descriptor;
mod limiter;
mod registry;
mod rules;
mod sweeper;

pub use backend::AdmissionBackend;
pub use descriptor::VisitorKey;
pub use limiter::Limiter;
pub use registry::{EvictionPolicy, Registry};
pub use rules::{LimitConfig, Rule, RuleSet, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
pub use sweeper::Sweeper;
