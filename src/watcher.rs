//! Filesystem change watcher with per-path debouncing
//!
//! Raw notify events are narrowed down to "this save file changed" triggers.
//! Writes, creates and renames into place count; anything else is ignored.
//! Only candidate files directly inside the watch root count, and repeated
//! triggers for the same path inside the cooldown are dropped. The debounce map is owned by the watcher and is only
//! touched from the task that drives [`ChangeWatcher::next`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::filter::FileFilter;

/// Buffered notify events between the notify thread and the sync loop
const EVENT_BUFFER: usize = 256;

/// Operation carried by a raw filesystem event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
    Rename,
    /// Metadata-only changes, access events and anything else
    Other,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => ChangeKind::Create,
            // A file moved into place is new content at the destination
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Create,
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => ChangeKind::Other,
            EventKind::Modify(_) => ChangeKind::Write,
            EventKind::Remove(_) => ChangeKind::Remove,
            _ => ChangeKind::Other,
        }
    }
}

/// A single path/operation pair taken from a notify event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Split a notify event into one entry per path.
    ///
    /// A rename reported as a single `[from, to]` event keeps the source as a
    /// rename and turns the destination into a create.
    pub fn from_notify(event: Event) -> Vec<RawEvent> {
        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            let last = event.paths.len().saturating_sub(1);
            return event
                .paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| {
                    let kind = if i == last {
                        ChangeKind::Create
                    } else {
                        ChangeKind::Rename
                    };
                    RawEvent::new(path, kind)
                })
                .collect();
        }

        let kind = ChangeKind::from(&event.kind);
        event
            .paths
            .into_iter()
            .map(|path| RawEvent::new(path, kind))
            .collect()
    }
}

/// What the watcher hands to the sync loop
#[derive(Debug)]
pub enum WatchSignal {
    /// A candidate file changed and passed the cooldown
    Changed(PathBuf),
    /// The notification facility reported a failure; watching continues
    Error(SyncError),
}

/// Event acceptance rules plus the debounce state
#[derive(Debug)]
pub struct ChangeFilter {
    root: PathBuf,
    filter: FileFilter,
    cooldown: chrono::Duration,
    last_accepted: HashMap<PathBuf, DateTime<Utc>>,
}

impl ChangeFilter {
    pub fn new(root: impl Into<PathBuf>, filter: FileFilter, cooldown: Duration) -> Result<Self> {
        let cooldown = chrono::Duration::from_std(cooldown)
            .map_err(|e| SyncError::Config(format!("cooldown out of range: {}", e)))?;
        Ok(Self {
            root: root.into(),
            filter,
            cooldown,
            last_accepted: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decide whether an event becomes a sync trigger, using the wall clock
    pub fn should_process(&mut self, event: &RawEvent) -> bool {
        self.should_process_at(event, Utc::now())
    }

    /// Decide whether an event becomes a sync trigger at `now`
    pub fn should_process_at(&mut self, event: &RawEvent, now: DateTime<Utc>) -> bool {
        if !matches!(event.kind, ChangeKind::Write | ChangeKind::Create) {
            return false;
        }

        if !self.filter.is_sync_candidate(&event.path) {
            tracing::debug!("Ignoring non-candidate file {}", event.path.display());
            return false;
        }

        if event.path.parent() != Some(self.root.as_path()) {
            tracing::debug!("Ignoring file outside watch root {}", event.path.display());
            return false;
        }

        if let Some(last) = self.last_accepted.get(&event.path) {
            if now - *last <= self.cooldown {
                tracing::debug!("Debounced {}", event.path.display());
                return false;
            }
        }

        self.last_accepted.insert(event.path.clone(), now);
        true
    }

    /// Drop the cooldown for `path`, so its next change is accepted right away
    pub fn forget(&mut self, path: &Path) {
        self.last_accepted.remove(path);
    }
}

/// Stream of debounced change triggers for one watch root
pub struct ChangeWatcher {
    _watcher: Option<RecommendedWatcher>,
    events: mpsc::Receiver<notify::Result<Event>>,
    filter: ChangeFilter,
    pending: VecDeque<PathBuf>,
}

impl ChangeWatcher {
    /// Start watching `root` (non-recursively)
    pub fn start(root: &Path, filter: FileFilter, cooldown: Duration) -> Result<Self> {
        // FSEvents reports resolved paths, so compare against the resolved root
        let root = std::fs::canonicalize(root)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if tx.blocking_send(res).is_err() {
                tracing::debug!("Change watcher dropped, discarding event");
            }
        })?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} for changes", root.display());

        let filter = ChangeFilter::new(root, filter, cooldown)?;
        Ok(Self {
            _watcher: Some(watcher),
            events: rx,
            filter,
            pending: VecDeque::new(),
        })
    }

    /// Build a watcher fed by an arbitrary event channel instead of notify
    pub fn from_channel(filter: ChangeFilter, events: mpsc::Receiver<notify::Result<Event>>) -> Self {
        Self {
            _watcher: None,
            events,
            filter,
            pending: VecDeque::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.filter.root()
    }

    /// Clear the cooldown of a trigger that was not acted on
    pub fn forget(&mut self, path: &Path) {
        self.filter.forget(path);
    }

    /// Next accepted trigger or watcher error; `None` once the event source is gone.
    ///
    /// Cancel safe: accepted paths are buffered before the next await point.
    pub async fn next(&mut self) -> Option<WatchSignal> {
        loop {
            if let Some(path) = self.pending.pop_front() {
                return Some(WatchSignal::Changed(path));
            }

            match self.events.recv().await? {
                Ok(event) => {
                    for raw in RawEvent::from_notify(event) {
                        if self.filter.should_process(&raw) {
                            tracing::info!("Detected change: {}", raw.path.display());
                            self.pending.push_back(raw.path);
                        }
                    }
                }
                Err(e) => return Some(WatchSignal::Error(SyncError::Watcher(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn filter_for(root: &str, cooldown_ms: u64) -> ChangeFilter {
        ChangeFilter::new(
            root,
            FileFilter::default(),
            Duration::from_millis(cooldown_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_change_kind_mapping() {
        assert_eq!(
            ChangeKind::from(&EventKind::Create(CreateKind::File)),
            ChangeKind::Create
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            ChangeKind::Write
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Any)),
            ChangeKind::Write
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            ChangeKind::Create
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            ChangeKind::Rename
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Name(RenameMode::Any))),
            ChangeKind::Rename
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))),
            ChangeKind::Other
        );
        assert_eq!(
            ChangeKind::from(&EventKind::Remove(RemoveKind::File)),
            ChangeKind::Remove
        );
    }

    #[test]
    fn test_rename_pair_splits_into_source_and_destination() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/saves/.slot.sav.a1B2.download"))
            .add_path(PathBuf::from("/saves/slot.sav"));

        assert_eq!(
            RawEvent::from_notify(event),
            vec![
                RawEvent::new("/saves/.slot.sav.a1B2.download", ChangeKind::Rename),
                RawEvent::new("/saves/slot.sav", ChangeKind::Create),
            ]
        );

        let moved_away = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/saves/slot.sav"));
        assert_eq!(
            RawEvent::from_notify(moved_away),
            vec![RawEvent::new("/saves/slot.sav", ChangeKind::Rename)]
        );
    }

    #[tokio::test]
    async fn test_save_renamed_into_place_triggers() {
        let (tx, rx) = mpsc::channel(8);
        let mut watcher = ChangeWatcher::from_channel(filter_for("/saves", 1000), rx);

        let moved_in = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/saves/slot.sav"));
        let replaced = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/saves/slot2.sav.tmp"))
            .add_path(PathBuf::from("/saves/slot2.sav"));
        let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/saves/slot3.sav"));
        tx.send(Ok(moved_in)).await.unwrap();
        tx.send(Ok(replaced)).await.unwrap();
        tx.send(Ok(moved_out)).await.unwrap();
        drop(tx);

        match watcher.next().await {
            Some(WatchSignal::Changed(path)) => assert_eq!(path, PathBuf::from("/saves/slot.sav")),
            other => panic!("unexpected signal: {:?}", other),
        }
        match watcher.next().await {
            Some(WatchSignal::Changed(path)) => assert_eq!(path, PathBuf::from("/saves/slot2.sav")),
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(watcher.next().await.is_none());
    }

    #[test]
    fn test_forget_clears_cooldown() {
        let mut filter = filter_for("/saves", 1000);
        let event = RawEvent::new("/saves/slot.sav", ChangeKind::Write);
        let t0 = Utc::now();

        assert!(filter.should_process_at(&event, t0));
        assert!(!filter.should_process_at(&event, t0 + chrono::Duration::milliseconds(10)));
        filter.forget(&event.path);
        assert!(filter.should_process_at(&event, t0 + chrono::Duration::milliseconds(20)));
    }

    #[test]
    fn test_should_process_event_kinds() {
        let mut filter = filter_for("/saves", 100);
        let now = Utc::now();

        assert!(filter.should_process_at(&RawEvent::new("/saves/a.sav", ChangeKind::Write), now));
        assert!(filter.should_process_at(&RawEvent::new("/saves/b.sav", ChangeKind::Create), now));
        assert!(!filter.should_process_at(&RawEvent::new("/saves/c.sav", ChangeKind::Remove), now));
        assert!(!filter.should_process_at(&RawEvent::new("/saves/d.sav", ChangeKind::Rename), now));
        assert!(!filter.should_process_at(&RawEvent::new("/saves/e.sav", ChangeKind::Other), now));
    }

    #[test]
    fn test_should_process_rejects_excluded_and_foreign_files() {
        let mut filter = filter_for("/saves", 100);
        let now = Utc::now();

        let settings = RawEvent::new("/saves/EnhancedInputUserSettings.sav", ChangeKind::Write);
        assert!(!filter.should_process_at(&settings, now));

        let text = RawEvent::new("/saves/notes.txt", ChangeKind::Write);
        assert!(!filter.should_process_at(&text, now));

        let nested = RawEvent::new("/saves/Backup/slot.sav", ChangeKind::Write);
        assert!(!filter.should_process_at(&nested, now));

        let elsewhere = RawEvent::new("/other/slot.sav", ChangeKind::Write);
        assert!(!filter.should_process_at(&elsewhere, now));
    }

    #[test]
    fn test_root_trailing_separator_is_ignored() {
        let mut filter = filter_for("/saves/", 100);
        let event = RawEvent::new("/saves/slot.sav", ChangeKind::Write);
        assert!(filter.should_process_at(&event, Utc::now()));
    }

    #[test]
    fn test_cooldown() {
        let mut filter = filter_for("/saves", 200);
        let event = RawEvent::new("/saves/slot.sav", ChangeKind::Write);
        let t0 = Utc::now();

        assert!(filter.should_process_at(&event, t0));
        assert!(!filter.should_process_at(&event, t0 + chrono::Duration::milliseconds(50)));
        assert!(!filter.should_process_at(&event, t0 + chrono::Duration::milliseconds(200)));
        assert!(filter.should_process_at(&event, t0 + chrono::Duration::milliseconds(260)));
    }

    #[test]
    fn test_cooldown_is_per_path() {
        let mut filter = filter_for("/saves", 1000);
        let t0 = Utc::now();

        assert!(filter.should_process_at(&RawEvent::new("/saves/a.sav", ChangeKind::Write), t0));
        assert!(filter.should_process_at(&RawEvent::new("/saves/b.sav", ChangeKind::Write), t0));
        assert!(!filter.should_process_at(&RawEvent::new("/saves/a.sav", ChangeKind::Create), t0));
    }

    #[tokio::test]
    async fn test_channel_watcher_emits_triggers_and_errors() {
        let (tx, rx) = mpsc::channel(8);
        let mut watcher = ChangeWatcher::from_channel(filter_for("/saves", 1000), rx);

        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/saves/notes.txt"))
            .add_path(PathBuf::from("/saves/one.sav"))
            .add_path(PathBuf::from("/saves/two.sav"));
        tx.send(Ok(event)).await.unwrap();
        tx.send(Err(notify::Error::generic("queue overflow"))).await.unwrap();
        drop(tx);

        match watcher.next().await {
            Some(WatchSignal::Changed(path)) => assert_eq!(path, PathBuf::from("/saves/one.sav")),
            other => panic!("unexpected signal: {:?}", other),
        }
        match watcher.next().await {
            Some(WatchSignal::Changed(path)) => assert_eq!(path, PathBuf::from("/saves/two.sav")),
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(matches!(
            watcher.next().await,
            Some(WatchSignal::Error(SyncError::Watcher(_)))
        ));
        assert!(watcher.next().await.is_none());
    }

    #[tokio::test]
    async fn test_real_watcher_sees_new_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher =
            ChangeWatcher::start(dir.path(), FileFilter::default(), Duration::from_secs(1))
                .unwrap();

        std::fs::write(dir.path().join("ignored.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("slot.sav"), b"save").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(10), watcher.next())
            .await
            .expect("no event within timeout");
        match signal {
            Some(WatchSignal::Changed(path)) => {
                assert_eq!(path.file_name().unwrap(), "slot.sav");
                assert_eq!(path.parent().unwrap(), watcher.root());
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
