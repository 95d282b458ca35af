//! Bidirectional save sync
//!
//! "Most recently modified wins" with a symmetric tolerance window. Every
//! decision is re-derived from what is on disk and in the bucket right now,
//! so nothing but the watcher's debounce map survives between invocations.

mod daemon;
mod engine;

pub use daemon::{DaemonCommand, DaemonHandle, SyncDaemon};
pub use engine::Syncer;

use chrono::{DateTime, Utc};

use crate::backup::BackupSnapshot;
use crate::types::SyncDecision;

/// What a single-file sync did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub decision: SyncDecision,
    /// Snapshot of the local file taken before acting, if one existed
    pub backup: Option<BackupSnapshot>,
    /// Bytes moved in either direction
    pub bytes: u64,
}

impl SyncOutcome {
    pub fn unchanged() -> Self {
        Self {
            decision: SyncDecision::NoOp,
            backup: None,
            bytes: 0,
        }
    }
}

/// Compare a local modification time with the remote one.
///
/// A missing remote always uploads. Otherwise `remote - local` beyond
/// `+tolerance` downloads, beyond `-tolerance` uploads, and anything inside
/// the closed window is left alone.
pub fn decide(
    local: DateTime<Utc>,
    remote: Option<DateTime<Utc>>,
    tolerance: chrono::Duration,
) -> SyncDecision {
    let Some(remote) = remote else {
        return SyncDecision::Upload;
    };

    let diff = remote - local;
    if diff > tolerance {
        SyncDecision::Download
    } else if diff < -tolerance {
        SyncDecision::Upload
    } else {
        SyncDecision::NoOp
    }
}
