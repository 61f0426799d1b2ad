//! Key material and issuance records.
//!
//! A [`Credential`] is the raw secret handed to a caller. Its `Debug` output is
//! redacted to the display prefix so credentials never end up in logs whole.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of leading characters shown when a credential is logged.
pub const DISPLAY_PREFIX_LEN: usize = 8;

/// An opaque secret token from the key pool. Identity is the value itself.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// First few characters (e.g. "gwk_Ab12"), safe for logs and display.
    pub fn prefix(&self) -> &str {
        display_prefix(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}…)", self.prefix())
    }
}

/// Truncate a presented key for logging. Works on arbitrary client input,
/// so it respects char boundaries.
pub fn display_prefix(raw: &str) -> &str {
    match raw.char_indices().nth(DISPLAY_PREFIX_LEN) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

/// Association between a caller identity and the credential it received.
/// Created once per identity and never modified.
#[derive(Debug, Clone)]
pub struct IssuanceRecord {
    pub identity: String,
    pub credential: Credential,
    pub issued_at: DateTime<Utc>,
}

/// Allocation counters for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub allocated: usize,
    pub free: usize,
}
