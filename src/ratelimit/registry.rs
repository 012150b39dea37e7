//! Registry of per-visitor limiters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::descriptor::VisitorKey;
use super::limiter::Limiter;
use super::rules::RuleSet;

/// When the sweep runs and what it considers stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// How often the sweep runs, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a locked limiter is kept, in seconds
    #[serde(default = "default_locked_ttl")]
    pub locked_ttl_secs: u64,

    /// How long a healthy limiter may go without an admission, in seconds
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl EvictionPolicy {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn locked_ttl(&self) -> Duration {
        Duration::from_secs(self.locked_ttl_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            locked_ttl_secs: default_locked_ttl(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_locked_ttl() -> u64 {
    3600
}

fn default_idle_ttl() -> u64 {
    180
}

/// Owns one [`Limiter`] per (client, resource) pair.
///
/// Lookups and inserts happen under a single registry-wide lock; each limiter
/// carries its own lock for admission decisions. When both are needed (the
/// sweep), the registry lock is always taken first.
///
/// The table has no size bound besides the sweep, so a flood of distinct
/// client identifiers grows it until the next pass.
pub struct Registry {
    /// Limiters indexed by `{client_id}_{resource_key}`
    visitors: Mutex<HashMap<String, Arc<Limiter>>>,
    /// Policies used when creating limiters
    rules: RuleSet,
    /// Staleness thresholds for the sweep
    eviction: EvictionPolicy,
}

impl Registry {
    /// Create a registry with the default eviction policy.
    pub fn new(rules: impl Into<RuleSet>) -> Self {
        Self::with_eviction(rules, EvictionPolicy::default())
    }

    /// Create a registry with a custom eviction policy.
    pub fn with_eviction(rules: impl Into<RuleSet>, eviction: EvictionPolicy) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            rules: rules.into(),
            eviction,
        }
    }

    /// Look up the limiter for a visitor, creating it on first use.
    ///
    /// Every call for the same pair returns the same shared instance until
    /// the sweep evicts it.
    pub fn get_or_create(&self, client_id: &str, resource_key: &str) -> Arc<Limiter> {
        self.get_or_create_at(client_id, resource_key, Instant::now())
    }

    /// Like [`Registry::get_or_create`], starting a new limiter's window at `now`.
    pub fn get_or_create_at(
        &self,
        client_id: &str,
        resource_key: &str,
        now: Instant,
    ) -> Arc<Limiter> {
        let key = VisitorKey::new(client_id, resource_key);
        let mut visitors = self.visitors.lock();

        visitors
            .entry(key.to_string_key())
            .or_insert_with(|| {
                let limiter = Limiter::for_resource_at(resource_key, &self.rules, now);
                let limits = limiter.limits();
                debug!(
                    key = %key,
                    window_seconds = limits.window_seconds,
                    max_requests = limits.max_requests,
                    "Creating new limiter"
                );
                Arc::new(limiter)
            })
            .clone()
    }

    /// Look up an existing limiter without creating one.
    pub fn get(&self, client_id: &str, resource_key: &str) -> Option<Arc<Limiter>> {
        let key = VisitorKey::new(client_id, resource_key).to_string_key();
        self.visitors.lock().get(&key).cloned()
    }

    /// Decide whether to admit a request from `client_id` for `resource_key`.
    pub fn admit(&self, client_id: &str, resource_key: &str) -> bool {
        self.admit_at(client_id, resource_key, Instant::now())
    }

    /// Decide whether to admit a request arriving at `now`.
    pub fn admit_at(&self, client_id: &str, resource_key: &str, now: Instant) -> bool {
        trace!(
            client_id = %client_id,
            resource_key = %resource_key,
            "Checking admission"
        );

        // The registry lock is released before the limiter lock is taken.
        let limiter = self.get_or_create_at(client_id, resource_key, now);
        let admitted = limiter.allow_at(now);

        if !admitted {
            debug!(
                client_id = %client_id,
                resource_key = %resource_key,
                count = limiter.count(),
                "Request rejected, visitor is locked"
            );
        }

        admitted
    }

    /// Evict stale limiters now. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict limiters that are stale at `now`. Returns the number evicted.
    ///
    /// Holds the registry lock for the whole pass.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let locked_ttl = self.eviction.locked_ttl();
        let idle_ttl = self.eviction.idle_ttl();

        let mut visitors = self.visitors.lock();
        let before = visitors.len();
        visitors.retain(|key, limiter| {
            let stale = limiter.is_stale_at(now, locked_ttl, idle_ttl);
            if stale {
                trace!(key = %key, locked = limiter.is_locked(), "Evicting limiter");
            }
            !stale
        });
        let evicted = before - visitors.len();

        if evicted > 0 {
            info!(
                evicted = evicted,
                remaining = visitors.len(),
                "Swept stale limiters"
            );
        } else {
            trace!(remaining = visitors.len(), "Sweep found nothing to evict");
        }

        evicted
    }

    /// Whether a limiter exists for the visitor.
    pub fn contains(&self, client_id: &str, resource_key: &str) -> bool {
        let key = VisitorKey::new(client_id, resource_key).to_string_key();
        self.visitors.lock().contains_key(&key)
    }

    /// Number of tracked limiters.
    pub fn len(&self) -> usize {
        self.visitors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.lock().is_empty()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn eviction(&self) -> &EvictionPolicy {
        &self.eviction
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("visitors", &self.len())
            .field("rules", &self.rules)
            .field("eviction", &self.eviction)
            .finish()
    }
}

impl super::backend::AdmissionBackend for Registry {
    fn admit(&self, client_id: &str, resource_key: &str) -> bool {
        Registry::admit(self, client_id, resource_key)
    }
}
