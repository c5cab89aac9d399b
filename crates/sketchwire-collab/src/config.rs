//! Collaboration engine settings
//!
//! Deserialized from the `[collab]` table of the server configuration; every
//! field has a default so an empty table is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Tunables of the collaboration engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Upper bound on lock lifetime in milliseconds
    #[serde(default = "default_lock_max_ttl_ms")]
    pub lock_max_ttl_ms: u64,
    /// Elements per `SYNC_RESPONSE_CHUNK`
    #[serde(default = "default_sync_chunk_size")]
    pub sync_chunk_size: usize,
    /// Bounded outbound queue per connection
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// A session with no subscribers is evicted after this many idle seconds
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// How often the eviction sweep runs
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    /// Ingress rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_lock_max_ttl_ms() -> u64 {
    30_000
}

fn default_sync_chunk_size() -> usize {
    100
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_session_idle_secs() -> u64 {
    600
}

fn default_eviction_interval_secs() -> u64 {
    60
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            lock_max_ttl_ms: default_lock_max_ttl_ms(),
            sync_chunk_size: default_sync_chunk_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            session_idle_secs: default_session_idle_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl CollabConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.lock_max_ttl_ms == 0 {
            return Err(Error::Configuration(
                "lock_max_ttl_ms must be greater than zero".into(),
            ));
        }
        if self.sync_chunk_size == 0 {
            return Err(Error::Configuration(
                "sync_chunk_size must be greater than zero".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(Error::Configuration(
                "outbound_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.user_per_second == 0 || self.rate_limit.project_per_second == 0)
        {
            return Err(Error::Configuration(
                "rate limits must be greater than zero when enabled".into(),
            ));
        }
        Ok(())
    }

    /// Idle threshold for session eviction
    #[must_use]
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    /// Interval between eviction sweeps
    #[must_use]
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

/// Ingress rate limit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Enable limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Messages per second per user within one project
    #[serde(default = "default_user_per_second")]
    pub user_per_second: u32,
    /// Messages per second per project
    #[serde(default = "default_project_per_second")]
    pub project_per_second: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_user_per_second() -> u32 {
    100
}

fn default_project_per_second() -> u32 {
    500
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            user_per_second: default_user_per_second(),
            project_per_second: default_project_per_second(),
        }
    }
}
