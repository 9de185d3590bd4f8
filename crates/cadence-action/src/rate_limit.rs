//! Per-agent sliding-window rate limiter.
//!
//! Each recorded request expires exactly one window after it was recorded,
//! so capacity comes back gradually rather than all at once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::config::RateLimitConfig;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ActionError;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_requests as usize,
            Duration::from_secs(config.window_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, VecDeque<Instant>>> {
        // The map holds no invariants a panic could break.
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(window: Duration, stamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = stamps.front() {
            if now.duration_since(*oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Requests counted against the agent in the current window.
    pub fn current_count(&self, agent_id: Uuid) -> usize {
        let now = Instant::now();
        let mut requests = self.lock();
        match requests.get_mut(&agent_id) {
            Some(stamps) => {
                Self::prune(self.window, stamps, now);
                stamps.len()
            }
            None => 0,
        }
    }

    /// Whether the agent may accept another request right now.
    pub fn can_process(&self, agent_id: Uuid) -> bool {
        self.current_count(agent_id) < self.max_requests
    }

    /// How long until the agent regains capacity, or `None` if it has some now.
    ///
    /// A limiter that allows no requests at all never frees up, so it also
    /// reports `None` and leaves the rejection to [`RateLimiter::check`].
    pub fn retry_after(&self, agent_id: Uuid) -> Option<Duration> {
        if self.max_requests == 0 {
            return None;
        }
        let now = Instant::now();
        let mut requests = self.lock();
        let stamps = requests.get_mut(&agent_id)?;
        Self::prune(self.window, stamps, now);
        if stamps.len() < self.max_requests {
            return None;
        }
        // Expiring this stamp brings the count back under the limit.
        let freeing = stamps[stamps.len() - self.max_requests];
        Some(self.window.saturating_sub(now.duration_since(freeing)))
    }

    pub fn record_request(&self, agent_id: Uuid) {
        let now = Instant::now();
        let mut requests = self.lock();
        let stamps = requests.entry(agent_id).or_default();
        Self::prune(self.window, stamps, now);
        stamps.push_back(now);
    }

    pub fn check(&self, agent_id: Uuid) -> Result<(), ActionError> {
        if self.can_process(agent_id) {
            Ok(())
        } else {
            tracing::warn!(agent_id = %agent_id, limit = self.max_requests, "Agent rate limited");
            Err(ActionError::RateLimited(agent_id))
        }
    }
}
