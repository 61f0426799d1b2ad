//! Fixed pool of pre-provisioned API keys.
//!
//! # Lifecycle
//!
//! Every key is provisioned once at startup and moves `free → allocated`
//! exactly once. Allocated keys are never released or handed out again for
//! the lifetime of the process; nothing here is persisted.
//!
//! # Key format
//!
//! Generated keys are `gwk_` + 40 Base62 characters (44 chars total), drawn
//! from `rand::rng()`. Operators may instead provision an explicit list, in
//! which case the values are used verbatim and allocated in the given order.
//!
//! # Validation
//!
//! [`KeyPool::is_allocated`] compares the presented value against every
//! allocated key with `subtle`'s constant-time equality and folds the results,
//! so the time taken does not depend on which key (if any) matched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::Rng;
use subtle::{Choice, ConstantTimeEq};

use super::types::{Credential, PoolStats};
use crate::error::{GatewayError, GatewayResult};

const KEY_PREFIX: &str = "gwk_";

const KEY_RANDOM_LEN: usize = 40;

const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a raw API key: `gwk_` + 40 random Base62 characters.
pub fn generate_raw_key() -> String {
    let mut rng = rand::rng();
    let random_part: String = (0..KEY_RANDOM_LEN)
        .map(|_| {
            let idx = rng.random_range(0..BASE62_CHARS.len());
            BASE62_CHARS[idx] as char
        })
        .collect();
    format!("{}{}", KEY_PREFIX, random_part)
}

struct Slot {
    credential: Credential,
    allocated: bool,
}

/// In-memory key pool. Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct KeyPool {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl KeyPool {
    /// Build a pool from explicit key values. Blank values and duplicates are
    /// dropped; allocation follows the given order.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let slots = values
            .into_iter()
            .map(|v| {
                let v: String = v.into();
                v.trim().to_string()
            })
            .filter(|v| !v.is_empty())
            .filter(|v| seen.insert(v.clone()))
            .map(|v| Slot {
                credential: Credential::new(v),
                allocated: false,
            })
            .collect();

        Self {
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    /// Provision `size` freshly generated keys.
    pub fn generate(size: usize) -> Self {
        Self::new((0..size).map(|_| generate_raw_key()))
    }

    /// Take the next free key and mark it allocated.
    pub fn allocate(&self) -> GatewayResult<Credential> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .iter_mut()
            .find(|s| !s.allocated)
            .ok_or(GatewayError::Exhausted)?;
        slot.allocated = true;
        Ok(slot.credential.clone())
    }

    /// Whether `value` matches a key that has been handed out.
    /// Free keys do not count: a key nobody was issued cannot authenticate.
    pub fn is_allocated(&self, value: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let presented = value.as_bytes();
        let matched = slots
            .iter()
            .filter(|s| s.allocated)
            .fold(Choice::from(0u8), |acc, s| {
                acc | s.credential.as_str().as_bytes().ct_eq(presented)
            });
        matched.into()
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let allocated = slots.iter().filter(|s| s.allocated).count();
        PoolStats {
            total: slots.len(),
            allocated,
            free: slots.len() - allocated,
        }
    }
}
