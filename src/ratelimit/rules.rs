//! Rate limit rules and policy resolution.
//!
//! Rules are static: they are loaded once at startup, kept in order, and
//! looked up by exact resource key when a limiter is created.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{GatekeeperError, Result};

/// Window length applied when no rule matches a resource key.
pub const DEFAULT_WINDOW_SECS: u64 = 60;
/// Admissions per window applied when no rule matches a resource key.
pub const DEFAULT_MAX_REQUESTS: u64 = 60;

/// A named policy for one resource key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Resource key this rule applies to (e.g. a route path)
    pub key: String,
    /// Length of the counting window in seconds
    pub window_seconds: u64,
    /// Admissions allowed per window
    pub max_requests: u64,
}

impl Rule {
    /// Create a new rule.
    pub fn new(key: impl Into<String>, window_seconds: u64, max_requests: u64) -> Self {
        Self {
            key: key.into(),
            window_seconds,
            max_requests,
        }
    }

    /// The policy this rule resolves to.
    pub fn limits(&self) -> LimitConfig {
        LimitConfig {
            window_seconds: self.window_seconds,
            max_requests: self.max_requests,
        }
    }

    fn is_usable(&self) -> bool {
        self.window_seconds > 0 && self.max_requests > 0
    }
}

/// The resolved window and admission limit for a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Window length in seconds
    pub window_seconds: u64,
    /// Admissions allowed per window
    pub max_requests: u64,
}

impl LimitConfig {
    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

/// An ordered, read-only table of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set, dropping rules that could never admit anything.
    ///
    /// A rule with a zero window or a zero limit is skipped with a warning,
    /// so its key falls back to the default policy.
    pub fn new(rules: Vec<Rule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| {
                if rule.is_usable() {
                    return true;
                }
                warn!(
                    key = %rule.key,
                    window_seconds = rule.window_seconds,
                    max_requests = rule.max_requests,
                    "Ignoring unusable rate limit rule, default policy applies"
                );
                false
            })
            .collect();
        Self { rules }
    }

    /// Parse a YAML list of rules.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: Vec<Rule> = serde_yaml::from_str(yaml).map_err(|e| {
            GatekeeperError::Config(format!("Failed to parse rate limit rules: {}", e))
        })?;
        Ok(Self::new(rules))
    }

    /// Find the first rule whose key equals `resource_key`.
    pub fn find(&self, resource_key: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.key == resource_key)
    }

    /// Resolve the policy for a resource key, falling back to the default.
    pub fn resolve(&self, resource_key: &str) -> LimitConfig {
        self.find(resource_key)
            .map(Rule::limits)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}
