//! Lock Manager
//!
//! Per-element mutual exclusion with a bounded lifetime. An element is
//! `Unlocked` or `Locked(owner, token, expiresAt)`; expiry is evaluated
//! lazily whenever a request or an update check touches the entry, there is
//! no background sweep.
//!
//! Every transition goes through [`CoordinationStore::compare_and_swap_lock`],
//! so two racing requesters can never both observe a successful grant.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::envelope::ProjectId;
use crate::error::{Error, Result};
use crate::payload::LockView;
use crate::store::{CoordinationStore, LockRecord};

/// Upper bound on any lock lifetime
pub const DEFAULT_MAX_LOCK_TTL_MS: u64 = 30_000;

/// Give up after this many lost compare-and-swap rounds
const MAX_CAS_ATTEMPTS: usize = 16;

/// A granted lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Locked element
    pub element_id: String,
    /// Holder
    pub owner_id: String,
    /// Opaque token
    pub token: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

/// Result of a lock request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now holds the lock
    Granted(LockGrant),
    /// Someone else holds a live lock
    Rejected {
        /// Current holder
        held_by: String,
    },
}

/// Result of an update check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// The update may proceed
    Allowed,
    /// A different user holds a live lock
    Locked {
        /// Current holder
        held_by: String,
    },
}

/// Lock table of one project
#[derive(Clone)]
pub struct LockManager {
    project_id: ProjectId,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    max_ttl_ms: u64,
}

impl LockManager {
    /// Lock manager for one project
    #[must_use]
    pub fn new(
        project_id: impl Into<ProjectId>,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            store,
            clock,
            max_ttl_ms: DEFAULT_MAX_LOCK_TTL_MS,
        }
    }

    /// Configure the lifetime cap
    #[must_use]
    pub fn with_max_ttl_ms(mut self, max_ttl_ms: u64) -> Self {
        self.max_ttl_ms = max_ttl_ms;
        self
    }

    /// Lifetime actually granted for a requested TTL
    #[must_use]
    pub fn effective_ttl(&self, requested_ttl: Option<u64>) -> u64 {
        match requested_ttl {
            Some(ttl) if ttl > 0 => ttl.min(self.max_ttl_ms),
            _ => self.max_ttl_ms,
        }
    }

    /// Request a lock.
    ///
    /// Granted when the element is unlocked, its lock has expired, or the
    /// caller already holds it (renewal with a fresh token).
    pub async fn request(
        &self,
        user_id: &str,
        element_id: &str,
        requested_ttl: Option<u64>,
    ) -> Result<LockOutcome> {
        let ttl = i64::try_from(self.effective_ttl(requested_ttl)).unwrap_or(i64::MAX);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now_ms();
            let existing = self.store.get_lock(&self.project_id, element_id).await?;

            if let Some(current) = &existing {
                if current.owner_id != user_id && current.is_live(now) {
                    return Ok(LockOutcome::Rejected {
                        held_by: current.owner_id.clone(),
                    });
                }
            }

            let record = LockRecord {
                owner_id: user_id.to_string(),
                token: Uuid::new_v4().to_string(),
                expires_at: now.saturating_add(ttl),
            };

            if self
                .store
                .compare_and_swap_lock(
                    &self.project_id,
                    element_id,
                    existing.as_ref(),
                    Some(record.clone()),
                )
                .await?
            {
                return Ok(LockOutcome::Granted(LockGrant {
                    element_id: element_id.to_string(),
                    owner_id: record.owner_id,
                    token: record.token,
                    expires_at: record.expires_at,
                }));
            }
            debug!(project_id = %self.project_id, element_id, "Lock request lost a race, retrying");
        }

        warn!(project_id = %self.project_id, element_id, "Lock request gave up under contention");
        Err(Error::store(format!(
            "lock table contention on element {}",
            element_id
        )))
    }

    /// Release a lock held by `user_id` or identified by `token`.
    ///
    /// Returns `false` (a no-op) when neither matches.
    pub async fn release(
        &self,
        user_id: &str,
        element_id: &str,
        token: Option<&str>,
    ) -> Result<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.store.get_lock(&self.project_id, element_id).await? else {
                return Ok(false);
            };

            let is_owner = current.owner_id == user_id;
            let token_matches = token.is_some_and(|t| t == current.token);
            if !is_owner && !token_matches {
                return Ok(false);
            }

            if self
                .store
                .compare_and_swap_lock(&self.project_id, element_id, Some(&current), None)
                .await?
            {
                return Ok(true);
            }
        }

        Err(Error::store(format!(
            "lock table contention on element {}",
            element_id
        )))
    }

    /// Decide whether an element update may proceed.
    ///
    /// Transient updates and updates without an element id always pass. An
    /// expired entry found on the way is removed.
    pub async fn check_for_update(
        &self,
        user_id: &str,
        element_id: Option<&str>,
        is_transient: bool,
    ) -> Result<UpdateCheck> {
        if is_transient {
            return Ok(UpdateCheck::Allowed);
        }
        let Some(element_id) = element_id else {
            return Ok(UpdateCheck::Allowed);
        };
        let Some(current) = self.store.get_lock(&self.project_id, element_id).await? else {
            return Ok(UpdateCheck::Allowed);
        };

        let now = self.clock.now_ms();
        if !current.is_live(now) {
            // Losing this race is fine: someone else already replaced the entry.
            self.store
                .compare_and_swap_lock(&self.project_id, element_id, Some(&current), None)
                .await?;
            return Ok(UpdateCheck::Allowed);
        }

        if current.owner_id != user_id {
            return Ok(UpdateCheck::Locked {
                held_by: current.owner_id,
            });
        }
        Ok(UpdateCheck::Allowed)
    }

    /// Remove every lock owned by `user_id`, returning the released element ids
    pub async fn release_all_for(&self, user_id: &str) -> Result<Vec<String>> {
        let mut released = Vec::new();
        for (element_id, record) in self.store.locks(&self.project_id).await? {
            if record.owner_id != user_id {
                continue;
            }
            if self
                .store
                .compare_and_swap_lock(&self.project_id, &element_id, Some(&record), None)
                .await?
            {
                released.push(element_id);
            }
        }
        released.sort();
        Ok(released)
    }

    /// Live locks by element id
    pub async fn snapshot(&self) -> Result<BTreeMap<String, LockView>> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .locks(&self.project_id)
            .await?
            .into_iter()
            .filter(|(_, record)| record.is_live(now))
            .map(|(element_id, record)| {
                (
                    element_id,
                    LockView {
                        locked_by: record.owner_id,
                        expires_at: record.expires_at,
                    },
                )
            })
            .collect())
    }
}
