//! Save-file candidate predicate

use std::path::Path;

use crate::types::{DEFAULT_EXCLUDED_FILE, DEFAULT_SAVE_SUFFIX};

/// Decides which file names take part in sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    suffix: String,
    excluded: String,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SAVE_SUFFIX, DEFAULT_EXCLUDED_FILE)
    }
}

impl FileFilter {
    pub fn new(suffix: impl Into<String>, excluded: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            excluded: excluded.into(),
        }
    }

    /// True iff the basename carries the save suffix and is not the excluded file.
    ///
    /// Works for both local paths and object keys.
    pub fn is_sync_candidate(&self, path: impl AsRef<Path>) -> bool {
        match path.as_ref().file_name().and_then(|n| n.to_str()) {
            Some(name) => self.is_candidate_name(name),
            None => false,
        }
    }

    /// Same check on a bare file name
    pub fn is_candidate_name(&self, name: &str) -> bool {
        name.ends_with(&self.suffix) && name != self.excluded
    }
}
