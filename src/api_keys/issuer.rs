use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::pool::KeyPool;
use super::types::{IssuanceRecord, PoolStats};
use crate::error::{GatewayError, GatewayResult};

/// Hands out at most one pool key per caller identity, ever.
///
/// The registry lock is held across the pool allocation so that lookup,
/// allocation, and recording happen as one step: two concurrent requests
/// from the same identity cannot both get a key, and a pool with one free
/// key serves exactly one of two competing identities.
#[derive(Clone)]
pub struct KeyIssuer {
    pool: KeyPool,
    records: Arc<Mutex<HashMap<String, IssuanceRecord>>>,
}

impl KeyIssuer {
    pub fn new(pool: KeyPool) -> Self {
        Self {
            pool,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn issue(&self, identity: &str, now: DateTime<Utc>) -> GatewayResult<IssuanceRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = records.get(identity) {
            log::warn!(
                "AUDIT action=issue identity={} outcome=already_issued issued_at={}",
                identity,
                existing.issued_at
            );
            return Err(GatewayError::AlreadyIssued {
                identity: identity.to_string(),
                at: existing.issued_at,
            });
        }

        let credential = match self.pool.allocate() {
            Ok(c) => c,
            Err(e) => {
                log::error!(
                    "AUDIT action=issue identity={} outcome=exhausted",
                    identity
                );
                return Err(e);
            }
        };

        let record = IssuanceRecord {
            identity: identity.to_string(),
            credential,
            issued_at: now,
        };
        records.insert(identity.to_string(), record.clone());
        drop(records);

        let stats = self.pool.stats();
        log::info!(
            "AUDIT action=issue identity={} outcome=issued prefix={} keys_free={}",
            identity,
            record.credential.prefix(),
            stats.free
        );

        Ok(record)
    }

    pub fn record_for(&self, identity: &str) -> Option<IssuanceRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(identity).cloned()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
