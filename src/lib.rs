//! cloudsync - save-game sync between a local folder and an S3-compatible bucket
//!
//! The newest copy of each save wins (within a tolerance window), every
//! overwrite is preceded by a timestamped backup, and syncing pauses while
//! the game itself is running.

pub mod backup;
pub mod error;
pub mod filter;
pub mod process;
pub mod storage;
pub mod sync;
pub mod types;
pub mod watcher;

pub use backup::{BackupManager, BackupSnapshot};
pub use error::{Result, SyncError};
pub use filter::FileFilter;
pub use process::{ProcessGuard, ProcessSource, SystemProcesses};
pub use storage::{MemoryStorage, Storage};
pub use sync::{decide, DaemonHandle, SyncDaemon, SyncOutcome, Syncer};
pub use types::*;
pub use watcher::{ChangeFilter, ChangeKind, ChangeWatcher, RawEvent, WatchSignal};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
