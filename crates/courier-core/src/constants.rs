//! Application-wide constants
//!
//! Centralized location for tunables used across multiple modules.

use std::time::Duration;

/// Maximum messages per network round-trip when draining the queue
pub const SEND_BATCH_SIZE: usize = 10;

/// Backoff delays between retry attempts for a failed transmission
pub const RETRY_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Maximum message text length, enforced at the send entry point
pub const MAX_TEXT_LEN: usize = 1000;

/// Two messages from the same sender with the same text within this window
/// are treated as the optimistic and confirmed copies of one logical message
pub const DEDUP_WINDOW_MS: i64 = 5_000;

/// Concurrency cap for per-chat fetches during delta sync
pub const DELTA_SYNC_CONCURRENCY: usize = 5;

/// Per-chat message cap for a single delta sync pass
pub const DELTA_SYNC_MAX_PER_CHAT: usize = 100;

/// How far back to sync when no checkpoint has ever been saved
pub const DELTA_SYNC_FALLBACK_HOURS: i64 = 24;

/// Key under which the delta-sync checkpoint is stored in durable config
pub const LAST_SYNC_KEY: &str = "last_sync_at";

/// Delay before reopening a dropped live subscription
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Soft latency budgets for a delta sync pass, logged when exceeded
pub const DELTA_SYNC_BUDGET_SMALL: Duration = Duration::from_secs(1);
pub const DELTA_SYNC_BUDGET_LARGE: Duration = Duration::from_secs(2);
/// Message count at or below which the small budget applies
pub const DELTA_SYNC_SMALL_THRESHOLD: usize = 100;

// Rate limit windows, most restrictive first
pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
