//! Admission control for the inference endpoint.
//!
//! A request passes the gate when its key is one that has been issued and the
//! caller identity has room in every configured quota window. Keys are not
//! bound to the identity that received them; the quota follows whoever
//! presents the key.

pub mod quota;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::api_keys::types::display_prefix;
use crate::api_keys::KeyPool;
use crate::error::{GatewayError, GatewayResult};
use quota::{QuotaWindow, RateLimit};

/// Idle quota entries are swept from the map once it grows past this size.
const QUOTA_PRUNE_THRESHOLD: usize = 4096;

/// Per-identity quota state plus the sweep schedule.
///
/// A sweep runs when the map reaches `next_sweep_at`; afterwards the mark is
/// set to twice the surviving size, so a map full of live entries is scanned
/// a logarithmic number of times while it grows.
struct QuotaTable {
    entries: HashMap<String, QuotaWindow>,
    next_sweep_at: usize,
    sweeps: usize,
}

impl QuotaTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_sweep_at: QUOTA_PRUNE_THRESHOLD,
            sweeps: 0,
        }
    }

    fn sweep_if_due(&mut self, identity: &str, now: DateTime<Utc>) {
        if self.entries.len() < self.next_sweep_at || self.entries.contains_key(identity) {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, q| !q.is_idle(now));
        self.sweeps += 1;
        self.next_sweep_at = QUOTA_PRUNE_THRESHOLD.max(self.entries.len().saturating_mul(2));
        log::debug!(
            "Quota sweep #{}: {} -> {} identities, next at {}",
            self.sweeps,
            before,
            self.entries.len(),
            self.next_sweep_at
        );
    }
}

#[derive(Clone)]
pub struct RequestGate {
    pool: KeyPool,
    limits: Arc<[RateLimit]>,
    quotas: Arc<Mutex<QuotaTable>>,
}

impl RequestGate {
    pub fn new(pool: KeyPool, limits: Vec<RateLimit>) -> Self {
        Self {
            pool,
            limits: limits.into(),
            quotas: Arc::new(Mutex::new(QuotaTable::new())),
        }
    }

    pub fn limits(&self) -> &[RateLimit] {
        &self.limits
    }

    /// Credential check alone: the key must be one that has been issued.
    pub fn authenticate(&self, credential: &str) -> GatewayResult<()> {
        if self.pool.is_allocated(credential) {
            Ok(())
        } else {
            Err(GatewayError::InvalidCredential)
        }
    }

    /// Full admission: credential check, then charge the identity's quota.
    pub fn admit(&self, credential: &str, identity: &str, now: DateTime<Utc>) -> GatewayResult<()> {
        if let Err(e) = self.authenticate(credential) {
            log::warn!(
                "AUDIT action=admit identity={} prefix={} outcome=invalid_credential",
                identity,
                display_prefix(credential)
            );
            return Err(e);
        }

        let mut quotas = self.quotas.lock().unwrap_or_else(|e| e.into_inner());
        quotas.sweep_if_due(identity, now);

        let quota = quotas
            .entries
            .entry(identity.to_string())
            .or_insert_with(|| QuotaWindow::new(&self.limits));

        match quota.try_acquire(now) {
            Ok(()) => {
                let remaining = quota.remaining();
                drop(quotas);
                log::info!(
                    "AUDIT action=admit identity={} prefix={} outcome=admitted remaining={}",
                    identity,
                    display_prefix(credential),
                    remaining
                );
                Ok(())
            }
            Err(exceeded) => {
                drop(quotas);
                log::warn!(
                    "AUDIT action=admit identity={} prefix={} outcome=rate_limited limit=\"{}\" retry_after={}s",
                    identity,
                    display_prefix(credential),
                    exceeded.limit,
                    exceeded.retry_after.as_secs()
                );
                Err(GatewayError::RateLimited {
                    limit: exceeded.limit.to_string(),
                    retry_after: exceeded.retry_after,
                })
            }
        }
    }
}
