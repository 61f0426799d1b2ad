use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api_keys::KeyPool;
use crate::error::{GatewayError, GatewayResult};
use crate::gate::quota::{parse_limits, RateLimit, DEFAULT_RATE_LIMITS};

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:9000/generate";
const DEFAULT_POOL_SIZE: usize = 10;

/// Gateway settings.
///
/// Loaded from an optional JSON file, then overridden by environment:
/// - `KEYGATE_BIND`: listen address (default `0.0.0.0:8000`)
/// - `KEYGATE_UPSTREAM_URL`: inference server endpoint
/// - `KEYGATE_UPSTREAM_TIMEOUT_SECS`: client-side timeout for inference calls
/// - `KEYGATE_POOL_SIZE`: number of keys to generate when none are listed (default 10)
/// - `KEYGATE_KEYS`: comma-separated explicit keys, allocated in order
/// - `KEYGATE_RATE_LIMITS`: e.g. `"100 per day, 20 per minute"`
/// - `KEYGATE_TRUST_FORWARDED_FOR`: identify callers by `X-Forwarded-For`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub upstream_url: String,
    pub upstream_timeout_secs: Option<u64>,
    pub pool_size: usize,
    pub keys: Vec<String>,
    pub rate_limits: String,
    pub trust_forwarded_for: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_timeout_secs: None,
            pool_size: DEFAULT_POOL_SIZE,
            keys: Vec::new(),
            rate_limits: DEFAULT_RATE_LIMITS.to_string(),
            trust_forwarded_for: false,
        }
    }
}

impl GatewayConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> GatewayResult<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            log::warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KEYGATE_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("KEYGATE_UPSTREAM_URL") {
            self.upstream_url = v;
        }
        if let Some(v) = lookup("KEYGATE_UPSTREAM_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.upstream_timeout_secs = Some(secs),
                Err(_) => log::warn!("Ignoring invalid KEYGATE_UPSTREAM_TIMEOUT_SECS={}", v),
            }
        }
        if let Some(v) = lookup("KEYGATE_POOL_SIZE") {
            match v.trim().parse() {
                Ok(n) => self.pool_size = n,
                Err(_) => log::warn!("Ignoring invalid KEYGATE_POOL_SIZE={}", v),
            }
        }
        if let Some(v) = lookup("KEYGATE_KEYS") {
            self.keys = v
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(v) = lookup("KEYGATE_RATE_LIMITS") {
            self.rate_limits = v;
        }
        if let Some(v) = lookup("KEYGATE_TRUST_FORWARDED_FOR") {
            self.trust_forwarded_for = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| GatewayError::Config(format!("invalid bind address '{}'", self.bind)))
    }

    pub fn limits(&self) -> GatewayResult<Vec<RateLimit>> {
        parse_limits(&self.rate_limits)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs.map(Duration::from_secs)
    }

    /// Provision the key pool: explicit keys if any, otherwise `pool_size`
    /// generated ones. An empty pool is a configuration error.
    pub fn build_pool(&self) -> GatewayResult<KeyPool> {
        let pool = if self.keys.is_empty() {
            KeyPool::generate(self.pool_size)
        } else {
            KeyPool::new(self.keys.iter().cloned())
        };
        if pool.stats().total == 0 {
            return Err(GatewayError::Config("key pool is empty".into()));
        }
        Ok(pool)
    }
}
