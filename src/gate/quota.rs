use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::GatewayError;

/// Default quota notation: both windows must have room for a request to pass.
pub const DEFAULT_RATE_LIMITS: &str = "100 per day, 20 per minute";

/// At most `max_requests` admitted within any rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::minutes(1))
    }

    pub fn per_day(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::days(1))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.window.num_seconds();
        let unit = match secs {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            86_400 => "day",
            _ => return write!(f, "{} per {}s", self.max_requests, secs),
        };
        write!(f, "{} per {}", self.max_requests, unit)
    }
}

fn unit_window(unit: &str) -> Option<Duration> {
    match unit.trim().to_ascii_lowercase().trim_end_matches('s') {
        "second" | "sec" => Some(Duration::seconds(1)),
        "minute" | "min" => Some(Duration::minutes(1)),
        "hour" => Some(Duration::hours(1)),
        "day" => Some(Duration::days(1)),
        _ => None,
    }
}

impl FromStr for RateLimit {
    type Err = GatewayError;

    /// Accepts `"20 per minute"`, `"20/minute"` and `"20 / min"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || GatewayError::Config(format!("invalid rate limit '{}'", s.trim()));

        let (count, unit) = if let Some((c, u)) = s.split_once('/') {
            (c, u)
        } else {
            let mut parts = s.split_whitespace();
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(c), Some(per), Some(u), None) if per.eq_ignore_ascii_case("per") => (c, u),
                _ => return Err(bad()),
            }
        };

        let max_requests: usize = count.trim().parse().map_err(|_| bad())?;
        if max_requests == 0 {
            return Err(bad());
        }
        let window = unit_window(unit).ok_or_else(bad)?;
        Ok(RateLimit::new(max_requests, window))
    }
}

/// Parse a comma-separated list such as `"100 per day, 20 per minute"`.
pub fn parse_limits(s: &str) -> Result<Vec<RateLimit>, GatewayError> {
    let limits = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<RateLimit>, _>>()?;
    if limits.is_empty() {
        return Err(GatewayError::Config("no rate limits configured".into()));
    }
    Ok(limits)
}

pub fn default_limits() -> Vec<RateLimit> {
    vec![RateLimit::per_day(100), RateLimit::per_minute(20)]
}

/// Log of admission times inside one rolling window.
struct SlidingWindow {
    limit: RateLimit,
    hits: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: VecDeque::with_capacity(limit.max_requests),
        }
    }

    /// Drop hits that have aged out. A hit at `t` counts while `now - t < window`.
    fn evict(&mut self, now: DateTime<Utc>) {
        while let Some(&oldest) = self.hits.front() {
            if now - oldest >= self.limit.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Callers may read the clock before taking the lock, so a late `now`
    /// is clamped to the newest hit. Keeps the deque ordered for `evict`.
    fn record(&mut self, now: DateTime<Utc>) {
        let at = self.hits.back().map_or(now, |&newest| newest.max(now));
        self.hits.push_back(at);
    }

    fn is_full(&self) -> bool {
        self.hits.len() >= self.limit.max_requests
    }

    fn retry_after(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.hits
            .front()
            .map(|&oldest| (oldest + self.limit.window - now).to_std().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Rejection details for the window that blocked a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exceeded {
    pub limit: RateLimit,
    pub retry_after: std::time::Duration,
}

/// Per-identity quota state: one sliding window per configured limit.
pub struct QuotaWindow {
    windows: Vec<SlidingWindow>,
}

impl QuotaWindow {
    pub fn new(limits: &[RateLimit]) -> Self {
        Self {
            windows: limits.iter().copied().map(SlidingWindow::new).collect(),
        }
    }

    /// Charge one request at `now` if every window has room. Nothing is
    /// charged on rejection. When several windows are full, the one that
    /// stays closed longest is reported.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<(), Exceeded> {
        for w in &mut self.windows {
            w.evict(now);
        }

        let blocked = self
            .windows
            .iter()
            .filter(|w| w.is_full())
            .map(|w| Exceeded {
                limit: w.limit,
                retry_after: w.retry_after(now),
            })
            .max_by_key(|e| e.retry_after);

        if let Some(exceeded) = blocked {
            return Err(exceeded);
        }

        for w in &mut self.windows {
            w.record(now);
        }
        Ok(())
    }

    /// True once every window has aged out completely.
    pub fn is_idle(&mut self, now: DateTime<Utc>) -> bool {
        self.windows.iter_mut().all(|w| {
            w.evict(now);
            w.hits.is_empty()
        })
    }

    /// Requests still available in the tightest window.
    pub fn remaining(&self) -> usize {
        self.windows
            .iter()
            .map(|w| w.limit.max_requests.saturating_sub(w.hits.len()))
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_limiter_notation() {
        let limits = parse_limits(DEFAULT_RATE_LIMITS).unwrap();
        assert_eq!(limits, default_limits());
    }

    #[test]
    fn parses_slash_and_plural_forms() {
        assert_eq!("5/second".parse::<RateLimit>().unwrap(), RateLimit::new(5, Duration::seconds(1)));
        assert_eq!("10 / hours".parse::<RateLimit>().unwrap(), RateLimit::new(10, Duration::hours(1)));
        assert_eq!("3 per days".parse::<RateLimit>().unwrap(), RateLimit::per_day(3));
        assert_eq!("7/min".parse::<RateLimit>().unwrap(), RateLimit::per_minute(7));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<RateLimit>().is_err());
        assert!("ten per minute".parse::<RateLimit>().is_err());
        assert!("0 per minute".parse::<RateLimit>().is_err());
        assert!("5 per fortnight".parse::<RateLimit>().is_err());
        assert!("5 every minute".parse::<RateLimit>().is_err());
        assert!("5/".parse::<RateLimit>().is_err());
        assert!("5/ms".parse::<RateLimit>().is_err());
        assert!(parse_limits(" , ").is_err());
    }

    #[test]
    fn display_round_trips_units() {
        assert_eq!(RateLimit::per_minute(20).to_string(), "20 per minute");
        assert_eq!(RateLimit::per_day(100).to_string(), "100 per day");
        assert_eq!(RateLimit::new(4, Duration::seconds(90)).to_string(), "4 per 90s");
    }

    #[test]
    fn minute_window_blocks_then_slides() {
        let mut quota = QuotaWindow::new(&[RateLimit::per_minute(3)]);
        let start = t0();
        assert!(quota.try_acquire(start).is_ok());
        assert!(quota.try_acquire(start + Duration::seconds(10)).is_ok());
        assert!(quota.try_acquire(start + Duration::seconds(20)).is_ok());

        let blocked = quota.try_acquire(start + Duration::seconds(30)).unwrap_err();
        assert_eq!(blocked.limit, RateLimit::per_minute(3));
        assert_eq!(blocked.retry_after, std::time::Duration::from_secs(30));

        // Just before the first hit ages out
        assert!(quota.try_acquire(start + Duration::milliseconds(59_999)).is_err());
        // The first hit ages out at exactly one minute
        assert!(quota.try_acquire(start + Duration::seconds(60)).is_ok());
        assert!(quota.try_acquire(start + Duration::seconds(61)).is_err());
    }

    #[test]
    fn rejection_is_not_charged() {
        let mut quota = QuotaWindow::new(&[RateLimit::per_minute(1)]);
        assert!(quota.try_acquire(t0()).is_ok());
        for s in 1..50 {
            assert!(quota.try_acquire(t0() + Duration::seconds(s)).is_err());
        }
        assert!(quota.try_acquire(t0() + Duration::seconds(60)).is_ok());
    }

    #[test]
    fn either_window_blocks_independently() {
        let mut quota = QuotaWindow::new(&[RateLimit::new(4, Duration::hours(1)), RateLimit::per_minute(2)]);
        let start = t0();
        assert!(quota.try_acquire(start).is_ok());
        assert!(quota.try_acquire(start).is_ok());
        // Minute window full, hour window has room
        let e = quota.try_acquire(start).unwrap_err();
        assert_eq!(e.limit, RateLimit::per_minute(2));

        let later = start + Duration::minutes(2);
        assert!(quota.try_acquire(later).is_ok());
        assert!(quota.try_acquire(later).is_ok());

        // Minute window clear, hour window full
        let e = quota.try_acquire(start + Duration::minutes(5)).unwrap_err();
        assert_eq!(e.limit, RateLimit::new(4, Duration::hours(1)));
        assert_eq!(e.retry_after, std::time::Duration::from_secs(55 * 60));
    }

    #[test]
    fn idle_after_all_windows_age_out() {
        let mut quota = QuotaWindow::new(&default_limits());
        quota.try_acquire(t0()).unwrap();
        assert!(!quota.is_idle(t0() + Duration::hours(1)));
        assert!(quota.is_idle(t0() + Duration::days(1)));
    }

    #[test]
    fn remaining_reports_tightest_window() {
        let mut quota = QuotaWindow::new(&default_limits());
        assert_eq!(quota.remaining(), 20);
        quota.try_acquire(t0()).unwrap();
        assert_eq!(quota.remaining(), 19);
    }

    #[test]
    fn late_clock_reading_keeps_window_ordered() {
        let mut quota = QuotaWindow::new(&[RateLimit::per_minute(3)]);
        quota.try_acquire(t0() + Duration::seconds(10)).unwrap();
        // A reading taken before the previous admission but applied after it
        quota.try_acquire(t0()).unwrap();
        quota.try_acquire(t0() + Duration::seconds(20)).unwrap();

        let hits: Vec<_> = quota.windows[0].hits.iter().copied().collect();
        assert!(hits.windows(2).all(|pair| pair[0] <= pair[1]), "hits out of order: {:?}", hits);

        let e = quota.try_acquire(t0() + Duration::seconds(30)).unwrap_err();
        assert_eq!(e.retry_after, std::time::Duration::from_secs(40));
    }
}
