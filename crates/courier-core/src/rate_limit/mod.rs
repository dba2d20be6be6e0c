//! Sliding-window quota limiter. Three discretely-bucketed windows
//! (minute, hour, day) are evaluated together, most restrictive first,
//! over a transactional counter store. Used to gate calls to metered
//! remote services; it knows nothing about chats or messages.

pub mod counters;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::constants::{DAY_MS, HOUR_MS, MINUTE_MS};
use crate::error::{CoreError, Result};

pub use counters::SqliteCounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// Most restrictive first; the check short-circuits on the first
    /// window at its limit.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    pub fn size_ms(&self) -> i64 {
        match self {
            Window::Minute => MINUTE_MS,
            Window::Hour => HOUR_MS,
            Window::Day => DAY_MS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    /// Discrete bucket index for a given instant.
    pub fn index_at(&self, now_ms: i64) -> i64 {
        now_ms / self.size_ms()
    }

    /// Start of the next bucket, the `reset_at` hint on denial.
    pub fn next_reset_ms(&self, now_ms: i64) -> i64 {
        (self.index_at(now_ms) + 1) * self.size_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl FeatureLimits {
    pub fn new(per_minute: u32, per_hour: u32, per_day: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            per_day,
        }
    }

    pub fn for_window(&self, window: Window) -> u32 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }
}

/// Per-feature ceilings. This table is the only feature-specific logic;
/// the algorithm itself is feature-agnostic.
fn builtin_limits() -> HashMap<String, FeatureLimits> {
    HashMap::from([
        ("translation".to_string(), FeatureLimits::new(15, 200, 1000)),
        ("smart_reply".to_string(), FeatureLimits::new(10, 100, 400)),
        ("summary".to_string(), FeatureLimits::new(5, 30, 100)),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Start of the next window of whichever window denied the call, or
    /// of the minute window when allowed.
    pub reset_at: i64,
}

/// Counter storage. Increments across all three windows must be
/// all-or-nothing; a crash between writes must not leave partial quota.
pub trait CounterStore: Send + Sync {
    fn get_count(&self, subject: &str, feature: &str, window: Window, window_index: i64)
        -> Result<u64>;

    /// Atomically add one to every listed (window, index) counter.
    fn increment_all(
        &self,
        subject: &str,
        feature: &str,
        entries: &[(Window, i64)],
    ) -> Result<()>;
}

pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    limits: HashMap<String, FeatureLimits>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self {
            counters,
            limits: builtin_limits(),
        }
    }

    pub fn with_limits(
        counters: Arc<dyn CounterStore>,
        limits: HashMap<String, FeatureLimits>,
    ) -> Self {
        Self { counters, limits }
    }

    fn limits_for(&self, feature: &str) -> Result<FeatureLimits> {
        self.limits
            .get(feature)
            .copied()
            .ok_or_else(|| CoreError::UnknownFeature(feature.to_string()))
    }

    pub fn check_rate_limit(&self, subject: &str, feature: &str) -> Result<RateLimitDecision> {
        self.check_at(subject, feature, chrono::Utc::now().timestamp_millis())
    }

    /// Check at an explicit instant. Windows are read most restrictive
    /// first and the first one at its limit short-circuits the rest. The
    /// reported `remaining` already accounts for the call being checked.
    pub fn check_at(
        &self,
        subject: &str,
        feature: &str,
        now_ms: i64,
    ) -> Result<RateLimitDecision> {
        let limits = self.limits_for(feature)?;
        let mut remaining = u32::MAX;

        for window in Window::ALL {
            let limit = limits.for_window(window);
            let count =
                self.counters
                    .get_count(subject, feature, window, window.index_at(now_ms))?;
            if count + 1 >= u64::from(limit) {
                debug!(
                    subject,
                    feature,
                    window = window.as_str(),
                    count,
                    limit,
                    "rate limit hit"
                );
                return Ok(RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: window.next_reset_ms(now_ms),
                });
            }
            let left = u32::try_from(u64::from(limit) - count - 1).unwrap_or(u32::MAX);
            remaining = remaining.min(left);
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining,
            reset_at: Window::Minute.next_reset_ms(now_ms),
        })
    }

    /// Consume one unit of quota across all three windows in a single
    /// transaction. Call only after the gated operation succeeded, so
    /// failed calls never burn quota.
    pub fn increment_rate_limit(&self, subject: &str, feature: &str) -> Result<()> {
        self.increment_at(subject, feature, chrono::Utc::now().timestamp_millis())
    }

    pub fn increment_at(&self, subject: &str, feature: &str, now_ms: i64) -> Result<()> {
        self.limits_for(feature)?;
        let entries: Vec<(Window, i64)> = Window::ALL
            .iter()
            .map(|w| (*w, w.index_at(now_ms)))
            .collect();
        self.counters.increment_all(subject, feature, &entries)
    }

    /// Check and fail with a quota-exceeded error when denied, carrying
    /// the `reset_at` hint for caller-side backoff.
    pub fn rate_limit_middleware(
        &self,
        subject: &str,
        feature: &str,
    ) -> Result<RateLimitDecision> {
        let decision = self.check_rate_limit(subject, feature)?;
        if !decision.allowed {
            return Err(CoreError::QuotaExceeded {
                feature: feature.to_string(),
                reset_at: decision.reset_at,
            });
        }
        Ok(decision)
    }
}
