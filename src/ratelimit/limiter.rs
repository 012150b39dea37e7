//! Fixed-window limiter for a single (client, resource) pair.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::rules::{LimitConfig, RuleSet};

/// A fixed-window counter with sticky lockout.
///
/// Once a limiter rejects a request it keeps rejecting every request until it
/// is evicted from its registry. There is no automatic unlock at the next
/// window boundary.
///
/// All state transitions happen under a per-limiter lock, so concurrent
/// callers for the same key are serialized while different keys never
/// contend with each other.
#[derive(Debug)]
pub struct Limiter {
    /// Policy resolved at creation time
    limits: LimitConfig,
    /// Mutable counting state
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    /// Admissions in the current window (keeps growing while locked)
    count: u64,
    /// When the current window started
    window_start: Instant,
    /// Most recent successful admission
    last_admitted: Instant,
    /// Set the moment the limiter first rejects
    locked_since: Option<Instant>,
}

impl Limiter {
    /// Create a limiter with an explicit policy.
    pub fn new(limits: LimitConfig) -> Self {
        Self::new_at(limits, Instant::now())
    }

    /// Create a limiter whose first window starts at `now`.
    pub fn new_at(limits: LimitConfig, now: Instant) -> Self {
        Self {
            limits,
            state: Mutex::new(LimiterState {
                count: 0,
                window_start: now,
                last_admitted: now,
                locked_since: None,
            }),
        }
    }

    /// Create a limiter for a resource key, resolving its policy from `rules`.
    pub fn for_resource(resource_key: &str, rules: &RuleSet) -> Self {
        Self::for_resource_at(resource_key, rules, Instant::now())
    }

    /// Like [`Limiter::for_resource`], with the first window starting at `now`.
    pub fn for_resource_at(resource_key: &str, rules: &RuleSet, now: Instant) -> Self {
        Self::new_at(rules.resolve(resource_key), now)
    }

    /// Decide whether to admit a request arriving now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Decide whether to admit a request arriving at `now`.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(1);

        // Whole seconds, so the tick where elapsed == window still counts as inside it.
        let elapsed = now.saturating_duration_since(state.window_start).as_secs();
        let within_window = elapsed <= self.limits.window_seconds;
        let over_limit = state.count > self.limits.max_requests;

        if state.locked_since.is_some() || (over_limit && within_window) {
            if state.locked_since.is_none() {
                state.locked_since = Some(now);
            }
            return false;
        }

        if over_limit || !within_window {
            state.window_start = now;
            state.count = 1;
        }

        state.last_admitted = now;
        true
    }

    /// Whether the limiter has tripped into lockout.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked_since.is_some()
    }

    /// When the limiter tripped into lockout, if it has.
    pub fn locked_since(&self) -> Option<Instant> {
        self.state.lock().locked_since
    }

    /// Requests counted in the current window.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Time of the most recent admission.
    pub fn last_admitted(&self) -> Instant {
        self.state.lock().last_admitted
    }

    /// The policy this limiter enforces.
    pub fn limits(&self) -> LimitConfig {
        self.limits
    }

    /// Whether this limiter is stale at `now`.
    ///
    /// A locked limiter is stale once it has been locked for `locked_ttl`; a
    /// healthy one once nothing has been admitted for `idle_ttl`.
    pub fn is_stale_at(&self, now: Instant, locked_ttl: Duration, idle_ttl: Duration) -> bool {
        let state = self.state.lock();
        match state.locked_since {
            Some(locked_since) => now.saturating_duration_since(locked_since) >= locked_ttl,
            None => now.saturating_duration_since(state.last_admitted) >= idle_ttl,
        }
    }
}
