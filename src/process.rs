//! Game process guard
//!
//! Sync is paused while the game runs so we never race its own save writes.

use sysinfo::{ProcessRefreshKind, RefreshKind, System};

use crate::error::{Result, SyncError};

/// Source of running executable names
pub trait ProcessSource: Send + Sync {
    fn process_names(&self) -> Result<Vec<String>>;
}

/// Live process table via sysinfo
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl ProcessSource for SystemProcesses {
    fn process_names(&self) -> Result<Vec<String>> {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let names: Vec<String> = system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect();

        if names.is_empty() {
            return Err(SyncError::Process(
                "process table is empty or unreadable".to_string(),
            ));
        }
        Ok(names)
    }
}

/// Answers "is the monitored game running right now?"
pub struct ProcessGuard {
    needle: Option<String>,
    source: Box<dyn ProcessSource>,
}

impl ProcessGuard {
    /// Guard against processes whose name contains `name` (case-insensitive).
    ///
    /// An empty or absent name disables the guard.
    pub fn new(name: Option<String>, source: Box<dyn ProcessSource>) -> Self {
        let needle = name
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty());
        Self { needle, source }
    }

    /// Guard that never reports a running process
    pub fn disabled() -> Self {
        Self::new(None, Box::new(SystemProcesses))
    }

    pub fn is_enabled(&self) -> bool {
        self.needle.is_some()
    }

    /// True on the first process whose name contains the configured name.
    ///
    /// Fails open: if the process list cannot be read, sync is allowed.
    pub fn is_running(&self) -> bool {
        let Some(needle) = &self.needle else {
            return false;
        };

        match self.source.process_names() {
            Ok(names) => names.iter().any(|n| n.to_lowercase().contains(needle)),
            Err(e) => {
                tracing::warn!("Error listing processes: {}", e);
                false
            }
        }
    }
}
