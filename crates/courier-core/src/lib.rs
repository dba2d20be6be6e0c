//! Local-first data layer for a chat client.
//!
//! Keeps a device-resident sqlite message store consistent with a remote
//! multi-writer document store under unreliable connectivity. Four
//! pieces: the local store (single source of truth for the UI), the
//! outbound queue (durable, ordered, retried), the sync reconciler
//! (delta sync plus live merge with optimistic dedup), and a
//! sliding-window rate limiter for metered remote calls.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod queue;
pub mod rate_limit;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod tracing_setup;

pub use config::{CoreConfig, QueueConfig, SyncConfig};
pub use error::{CoreError, Result};
pub use models::{Chat, ChatType, Message, MessageStatus, PendingMessage};
pub use queue::{DrainReport, MessageQueue, QueueStatus};
pub use rate_limit::{
    CounterStore, FeatureLimits, RateLimitDecision, RateLimiter, SqliteCounterStore, Window,
};
pub use remote::{
    ChangeEvent, ChangeKind, ConnectionStatus, Connectivity, Identity, KvConfig, RemoteStore,
};
pub use runtime::CoreRuntime;
pub use store::Database;
pub use sync::SyncReconciler;
