//! Process-level plumbing shared by every service: configuration from the
//! environment, the lifecycle host, and the global (account-level) locker.

pub mod config;
pub mod lifecycle;
pub mod locker;

pub use config::{ConfigError, env_duration_ms, env_or};
pub use lifecycle::{Lifecycle, LifecyclePhase, LifecycleRunError};
pub use locker::{GlobalLock, GlobalLocker, LockFailedError, LockerConfig, MemoryGlobalLocker};
