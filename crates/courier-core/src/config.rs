use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("courier_data")
    }
}

/// Tunables for the outbound queue. Tests inject millisecond schedules;
/// production uses the defaults from `constants`.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub retry_schedule: Vec<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::SEND_BATCH_SIZE,
            retry_schedule: constants::RETRY_SCHEDULE.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_messages_per_chat: usize,
    pub fetch_concurrency: usize,
    pub fallback_window_hours: i64,
    pub resubscribe_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_messages_per_chat: constants::DELTA_SYNC_MAX_PER_CHAT,
            fetch_concurrency: constants::DELTA_SYNC_CONCURRENCY,
            fallback_window_hours: constants::DELTA_SYNC_FALLBACK_HOURS,
            resubscribe_delay: constants::RESUBSCRIBE_DELAY,
        }
    }
}
