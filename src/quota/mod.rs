//! Rolling-window quota limiter.
//!
//! Each plan allows `limit` consumed units per trailing `window`. One unit is
//! one inbound message. Events are kept per `(plan, sender)` in a shared
//! store; the store performs prune → count → record as a single atomic step,
//! so concurrent requests at the boundary can never both be admitted.
//!
//! An event at exactly `now - window` is still inside the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, QuotaError, StoreError};

/// `(limit, window)` for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimit {
    pub limit: u32,
    pub window: Duration,
}

/// Named plans.
#[derive(Debug, Clone)]
pub struct PlanTable {
    plans: HashMap<String, PlanLimit>,
}

impl PlanTable {
    pub fn new(plans: HashMap<String, PlanLimit>) -> Self {
        Self { plans }
    }

    /// free: 30 / 7 days, pro: 300 / 30 days, team: 10 000 / 30 days.
    pub fn default_plans() -> Self {
        let day = 24 * 3600;
        let plans = [
            ("free", 30, 7 * day),
            ("pro", 300, 30 * day),
            ("team", 10_000, 30 * day),
        ]
        .into_iter()
        .map(|(name, limit, secs)| {
            (
                name.to_string(),
                PlanLimit {
                    limit,
                    window: Duration::from_secs(secs),
                },
            )
        })
        .collect();
        Self { plans }
    }

    pub fn get(&self, plan: &str) -> Option<PlanLimit> {
        self.plans.get(plan).copied()
    }

    pub fn contains(&self, plan: &str) -> bool {
        self.plans.contains_key(plan)
    }
}

/// Plan table plus the assignment of senders to plans.
#[derive(Debug, Clone)]
pub struct PlanDirectory {
    table: PlanTable,
    default_plan: String,
    sender_plans: HashMap<String, String>,
}

impl PlanDirectory {
    /// Every referenced plan must exist in `table`.
    pub fn new(
        table: PlanTable,
        default_plan: impl Into<String>,
        sender_plans: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let default_plan = default_plan.into();
        if !table.contains(&default_plan) {
            return Err(ConfigError::UnknownPlan(default_plan));
        }
        if let Some(plan) = sender_plans.values().find(|p| !table.contains(p)) {
            return Err(ConfigError::UnknownPlan(plan.clone()));
        }
        let sender_plans = sender_plans
            .into_iter()
            .map(|(addr, plan)| (addr.to_lowercase(), plan))
            .collect();
        Ok(Self {
            table,
            default_plan,
            sender_plans,
        })
    }

    /// Plan name assigned to `sender`.
    pub fn plan_for(&self, sender: &str) -> &str {
        self.sender_plans
            .get(&sender.to_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.default_plan)
    }

    pub fn table(&self) -> &PlanTable {
        &self.table
    }
}

/// Store key for one `(plan, sender)` window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub plan: String,
    pub sender: String,
}

impl QuotaKey {
    pub fn new(plan: &str, sender: &str) -> Self {
        Self {
            plan: plan.to_string(),
            sender: sender.to_lowercase(),
        }
    }
}

impl std::fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "quota:{}:{}", self.plan, self.sender)
    }
}

/// Shared ordered-set store of window entries.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically drop entries at or before `cutoff_ms`, count the rest,
    /// and record a new entry at `now_ms` only if the count is below `limit`.
    ///
    /// Returns whether the entry was recorded.
    async fn try_consume(
        &self,
        key: &QuotaKey,
        now_ms: i64,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<bool, StoreError>;

    /// Number of entries newer than `cutoff_ms`.
    async fn usage(&self, key: &QuotaKey, cutoff_ms: i64) -> Result<u32, StoreError>;
}

/// Outcome of a consume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Unit recorded; `remaining` units are left in the window.
    Allowed { remaining: u32 },
    /// Limit reached; nothing recorded.
    Exceeded { limit: u32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Enforces per-plan rolling windows against a shared `QuotaStore`.
pub struct QuotaLimiter {
    store: Arc<dyn QuotaStore>,
    plans: PlanTable,
    store_timeout: Duration,
}

impl QuotaLimiter {
    pub fn new(store: Arc<dyn QuotaStore>, plans: PlanTable, store_timeout: Duration) -> Self {
        Self {
            store,
            plans,
            store_timeout,
        }
    }

    /// Consume one unit for `sender` on `plan` at `now`.
    ///
    /// Unknown plans and store failures are errors; a full window is a
    /// `QuotaDecision::Exceeded`, which records nothing.
    pub async fn consume(
        &self,
        plan: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        let limits = self
            .plans
            .get(plan)
            .ok_or_else(|| QuotaError::UnknownPlan(plan.to_string()))?;
        let key = QuotaKey::new(plan, sender);
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(limits.window.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = now_ms.saturating_sub(window_ms);

        let admitted = tokio::time::timeout(
            self.store_timeout,
            self.store.try_consume(&key, now_ms, cutoff_ms, limits.limit),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        if !admitted {
            info!(key = %key, limit = limits.limit, "quota_block");
            return Ok(QuotaDecision::Exceeded {
                limit: limits.limit,
            });
        }

        let remaining = match tokio::time::timeout(
            self.store_timeout,
            self.store.usage(&key, cutoff_ms),
        )
        .await
        {
            Ok(Ok(used)) => limits.limit.saturating_sub(used),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to read quota usage after consume");
                0
            }
            Err(_) => {
                warn!(key = %key, "Timed out reading quota usage after consume");
                0
            }
        };
        debug!(key = %key, remaining, "quota_hit");
        Ok(QuotaDecision::Allowed { remaining })
    }
}
