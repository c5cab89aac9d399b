//! Ingress rate limiting
//!
//! Sliding-window limiters keyed per user within a project and per project.
//! Each key has its own window behind its own map shard, so busy projects do
//! not contend with each other.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Sliding window settings
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl WindowConfig {
    /// Create a window config
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Requests per second
    #[must_use]
    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Time until the oldest request leaves the window
    pub reset_after: Duration,
}

/// Sliding-window limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: WindowConfig,
    requests: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Check and record in one step
    pub fn acquire(&self, key: &str) -> RateLimitResult {
        self.acquire_at(key, Instant::now())
    }

    fn acquire_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut records = self.requests.entry(key.to_string()).or_default();
        let window_start = now.checked_sub(self.config.window);
        while let Some(oldest) = records.front() {
            if window_start.is_some_and(|start| *oldest <= start) {
                records.pop_front();
            } else {
                break;
            }
        }

        let current = u32::try_from(records.len()).unwrap_or(u32::MAX);
        let reset_after = records
            .front()
            .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO);

        if current < self.config.max_requests {
            records.push_back(now);
            RateLimitResult {
                allowed: true,
                remaining: self.config.max_requests - current - 1,
                reset_after,
            }
        } else {
            RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after,
            }
        }
    }

    /// Requests counted in the current window and the limit
    #[must_use]
    pub fn usage(&self, key: &str) -> (u32, u32) {
        let now = Instant::now();
        let current = self
            .requests
            .get(key)
            .map(|records| {
                records
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.config.window)
                    .count()
            })
            .unwrap_or(0);
        (
            u32::try_from(current).unwrap_or(u32::MAX),
            self.config.max_requests,
        )
    }

    /// Drop keys with no request inside the window; returns how many went away
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, records| {
            records.retain(|t| now.duration_since(*t) < self.config.window);
            !records.is_empty()
        });
        before.saturating_sub(self.requests.len())
    }

    /// Number of tracked keys
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}

/// Which tier refused a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// The sender's own budget within the project
    User,
    /// The project's aggregate budget
    Project,
}

/// Per-user and per-project ingress limits
#[derive(Debug, Clone)]
pub struct IngressLimiter {
    user_limiter: RateLimiter,
    project_limiter: RateLimiter,
}

impl IngressLimiter {
    /// Create from explicit window configs
    #[must_use]
    pub fn new(user: WindowConfig, project: WindowConfig) -> Self {
        Self {
            user_limiter: RateLimiter::new(user),
            project_limiter: RateLimiter::new(project),
        }
    }

    /// Create from settings; `None` when limiting is disabled
    #[must_use]
    pub fn from_settings(settings: &RateLimitSettings) -> Option<Self> {
        settings.enabled.then(|| {
            Self::new(
                WindowConfig::per_second(settings.user_per_second),
                WindowConfig::per_second(settings.project_per_second),
            )
        })
    }

    /// Admit one message from `user_id` in `project_id`.
    ///
    /// The user tier is checked first; a message it admits still counts
    /// against the user even if the project tier then refuses it.
    pub fn admit(&self, project_id: &str, user_id: &str) -> Result<(), LimitScope> {
        let user_key = format!("{}:{}", project_id, user_id);
        if !self.user_limiter.acquire(&user_key).allowed {
            return Err(LimitScope::User);
        }
        if !self.project_limiter.acquire(project_id).allowed {
            return Err(LimitScope::Project);
        }
        Ok(())
    }

    /// Drop idle keys from both tiers
    pub fn cleanup(&self) -> usize {
        self.user_limiter.cleanup() + self.project_limiter.cleanup()
    }

    /// Usage of one user within a project
    #[must_use]
    pub fn user_usage(&self, project_id: &str, user_id: &str) -> (u32, u32) {
        self.user_limiter
            .usage(&format!("{}:{}", project_id, user_id))
    }

    /// Usage of a project
    #[must_use]
    pub fn project_usage(&self, project_id: &str) -> (u32, u32) {
        self.project_limiter.usage(project_id)
    }
}

#[cfg(test)]
mod tests;
