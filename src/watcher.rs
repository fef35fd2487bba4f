use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_types::event::{Event, EventKind};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::persistence::SnapshotStore;
use crate::source::{ChatSource, DirectoryChatSource};
use crate::stats::StatsCollection;

/// How often the watch loop drains file events
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A chat was created or modified (character key, chat name)
    ChatChanged(String, String),
    /// A chat was deleted (character key, chat name)
    ChatDeleted(String, String),
    /// An error occurred
    Error(String),
}

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    event_rx: Receiver<WatcherEvent>,
}

impl FileWatcher {
    pub fn new(source: &DirectoryChatSource) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel();
        let layout = source.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(event, &event_tx, &layout),
                Err(e) => {
                    let _ = event_tx.send(WatcherEvent::Error(format!("Watch error: {e}")));
                }
            })?;

        watcher
            .watch(source.root(), RecursiveMode::Recursive)
            .with_context(|| format!("Could not watch {}", source.root().display()))?;

        Ok(Self {
            _watcher: watcher,
            event_rx,
        })
    }

    pub fn try_recv(&self) -> Option<WatcherEvent> {
        self.event_rx.try_recv().ok()
    }
}

fn handle_fs_event(event: Event, tx: &Sender<WatcherEvent>, layout: &DirectoryChatSource) {
    let deleted = match event.kind {
        // Renames arrive as modify events; a vanished file is rolled back
        // when it is reprocessed.
        EventKind::Create(_) | EventKind::Modify(_) => false,
        EventKind::Remove(_) => true,
        _ => return,
    };

    for path in &event.paths {
        let Some((character, chat)) = layout.identify(path) else {
            continue;
        };
        let _ = tx.send(if deleted {
            WatcherEvent::ChatDeleted(character, chat)
        } else {
            WatcherEvent::ChatChanged(character, chat)
        });
    }
}

/// Owns the live statistics in watch mode and keeps the snapshot current.
pub struct StatsManager<S> {
    source: S,
    stats: Arc<RwLock<StatsCollection>>,
    store: SnapshotStore,
    /// `calculated` stamp of the collection as last written
    last_saved: Option<DateTime<Utc>>,
    last_save_time: Option<Instant>,
    save_debounce: Duration,
}

impl<S: ChatSource> StatsManager<S> {
    pub fn new(
        source: S,
        store: SnapshotStore,
        stats: StatsCollection,
        save_debounce: Duration,
    ) -> Self {
        Self {
            source,
            stats: Arc::new(RwLock::new(stats)),
            store,
            last_saved: None,
            last_save_time: None,
            save_debounce,
        }
    }

    /// Start from the stored snapshot, or rebuild everything when there is
    /// no usable one.
    pub fn load_or_rebuild(
        source: S,
        store: SnapshotStore,
        save_debounce: Duration,
    ) -> Result<Self> {
        if let Some(stats) = store.load().context("Failed to load stats snapshot")? {
            let saved = stats.calculated;
            let mut manager = Self::new(source, store, stats, save_debounce);
            manager.last_saved = Some(saved);
            return Ok(manager);
        }

        let mut stats = StatsCollection::new();
        stats
            .recreate_stats(&source)
            .context("Failed to rebuild stats")?;
        Ok(Self::new(source, store, stats, save_debounce))
    }

    pub fn stats(&self) -> Arc<RwLock<StatsCollection>> {
        self.stats.clone()
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.stats.read().is_dirty_since(self.last_saved)
    }

    /// Apply one watcher event. Returns true when stats changed.
    pub fn handle_event(&mut self, event: WatcherEvent) -> bool {
        match event {
            WatcherEvent::ChatChanged(character, chat) => {
                match self.stats.write().update_chat(&self.source, &character, &chat) {
                    Ok(changed) => changed,
                    Err(e) => {
                        warn!(%character, %chat, "Could not update chat: {e}");
                        false
                    }
                }
            }
            WatcherEvent::ChatDeleted(character, chat) => {
                self.stats.write().remove_chat(&character, &chat).is_some()
            }
            WatcherEvent::Error(err) => {
                warn!("File watcher error: {err}");
                false
            }
        }
    }

    /// Save when there are unsaved changes and the debounce window has passed.
    pub fn save_if_due(&mut self) -> bool {
        let due = self
            .last_save_time
            .is_none_or(|last| last.elapsed() >= self.save_debounce);
        due && self.flush()
    }

    /// Save unsaved changes now. A failed write keeps the changes pending so
    /// the next trigger retries it.
    pub fn flush(&mut self) -> bool {
        let stats = self.stats.read();
        if !stats.is_dirty_since(self.last_saved) {
            return false;
        }

        self.last_save_time = Some(Instant::now());
        match self.store.save(&stats) {
            Ok(()) => {
                self.last_saved = Some(stats.calculated);
                true
            }
            Err(e) => {
                error!("Failed to save stats snapshot: {e}");
                false
            }
        }
    }

    /// Apply file events until `shutdown` resolves, then flush.
    pub async fn run<F>(&mut self, watcher: &FileWatcher, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let mut changed = 0usize;
                    while let Some(event) = watcher.try_recv() {
                        debug!(?event, "watcher event");
                        changed += usize::from(self.handle_event(event));
                    }
                    if changed > 0 {
                        let stats = self.stats.read();
                        info!(
                            changed,
                            chats = stats.global.chats,
                            characters = stats.characters.len(),
                            "stats updated"
                        );
                    }
                    self.save_if_due();
                }
            }
        }

        self.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_types::event::{
        CreateKind, Event as NotifyEvent, EventKind as NotifyEventKind, ModifyKind, RemoveKind,
    };
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const METADATA: &str = r#"{"user_name":"You","character_name":"Alice","create_date":"2024-05-01T10:00:00Z","chat_metadata":{"chat_id_hash":1}}"#;
    const USER: &str = r#"{"name":"You","is_user":true,"send_date":"2024-05-01T10:00:05Z","mes":"good morning"}"#;
    const REPLY: &str = r#"{"name":"Alice","is_user":false,"send_date":"2024-05-01T10:00:06Z","gen_started":"2024-05-01T10:00:06Z","gen_finished":"2024-05-01T10:00:09Z","mes":"morning to you too","extra":{"model":"gpt-4o","token_count":12},"swipes":["morning to you too"]}"#;

    fn write_chat(root: &Path, character: &str, chat: &str) -> PathBuf {
        let dir = root.join(character);
        fs::create_dir_all(&dir).expect("mkdirs");
        let path = dir.join(format!("{chat}.jsonl"));
        fs::write(&path, format!("{METADATA}\n{USER}\n{REPLY}\n")).expect("write chat");
        path
    }

    fn fs_event(kind: NotifyEventKind, path: &Path) -> Vec<WatcherEvent> {
        let layout = DirectoryChatSource::new("/tmp/chats");
        let (tx, rx) = mpsc::channel();
        handle_fs_event(NotifyEvent::new(kind).add_path(path.to_path_buf()), &tx, &layout);
        rx.try_iter().collect()
    }

    #[test]
    fn create_and_modify_emit_chat_changed() {
        let expected = vec![WatcherEvent::ChatChanged("Alice".into(), "morning".into())];
        let path = Path::new("/tmp/chats/Alice/morning.jsonl");
        assert_eq!(fs_event(NotifyEventKind::Create(CreateKind::File), path), expected);
        assert_eq!(fs_event(NotifyEventKind::Modify(ModifyKind::Any), path), expected);
    }

    #[test]
    fn remove_emits_chat_deleted() {
        let path = Path::new("/tmp/chats/Alice/morning.jsonl");
        assert_eq!(
            fs_event(NotifyEventKind::Remove(RemoveKind::File), path),
            vec![WatcherEvent::ChatDeleted("Alice".into(), "morning".into())]
        );
    }

    #[test]
    fn unrelated_paths_are_ignored() {
        let create = || NotifyEventKind::Create(CreateKind::File);
        assert!(fs_event(create(), Path::new("/tmp/chats/Alice/notes.txt")).is_empty());
        assert!(fs_event(create(), Path::new("/tmp/chats/Alice")).is_empty());
        assert!(fs_event(create(), Path::new("/elsewhere/Alice/x.jsonl")).is_empty());
        assert!(
            fs_event(
                NotifyEventKind::Access(notify_types::event::AccessKind::Any),
                Path::new("/tmp/chats/Alice/morning.jsonl")
            )
            .is_empty()
        );
    }

    fn manager(temp: &TempDir, debounce: Duration) -> StatsManager<DirectoryChatSource> {
        let source = DirectoryChatSource::new(temp.path().join("chats"));
        let store = SnapshotStore::new(temp.path().join("stats.json"));
        StatsManager::load_or_rebuild(source, store, debounce).expect("manager")
    }

    #[tokio::test]
    async fn manager_applies_events_and_saves() {
        let temp = TempDir::new().expect("tempdir");
        let chats = temp.path().join("chats");
        write_chat(&chats, "Alice", "first");

        let mut manager = manager(&temp, Duration::from_secs(3600));
        assert_eq!(manager.stats().read().global.chats, 1);
        assert!(manager.is_dirty());
        assert!(manager.save_if_due());
        assert!(!manager.is_dirty());

        write_chat(&chats, "Alice", "second");
        assert!(manager.handle_event(WatcherEvent::ChatChanged("Alice".into(), "second".into())));
        assert_eq!(manager.stats().read().global.chats, 2);

        // Inside the debounce window nothing is written until a flush
        assert!(!manager.save_if_due());
        assert!(manager.is_dirty());
        assert!(manager.flush());

        let saved = SnapshotStore::new(temp.path().join("stats.json"))
            .load()
            .expect("load")
            .expect("snapshot");
        assert_eq!(saved.global.chats, 2);

        fs::remove_file(chats.join("Alice").join("first.jsonl")).expect("remove");
        assert!(manager.handle_event(WatcherEvent::ChatDeleted("Alice".into(), "first".into())));
        assert!(!manager.handle_event(WatcherEvent::ChatDeleted("Alice".into(), "first".into())));
        assert!(!manager.handle_event(WatcherEvent::Error("something went wrong".into())));
        assert_eq!(manager.stats().read().global.chats, 1);
    }

    #[tokio::test]
    async fn manager_resumes_from_snapshot() {
        let temp = TempDir::new().expect("tempdir");
        write_chat(&temp.path().join("chats"), "Alice", "first");

        let mut first = manager(&temp, Duration::ZERO);
        assert!(first.flush());

        // The snapshot wins over the directory until something changes
        write_chat(&temp.path().join("chats"), "Bob", "hello");
        let resumed = manager(&temp, Duration::ZERO);
        assert!(!resumed.is_dirty());
        assert_eq!(resumed.stats().read().global.chats, 1);
    }

    #[tokio::test]
    async fn run_flushes_on_shutdown() {
        let temp = TempDir::new().expect("tempdir");
        let chats = temp.path().join("chats");
        write_chat(&chats, "Alice", "first");

        let mut manager = manager(&temp, Duration::from_secs(3600));
        let watcher = FileWatcher::new(&DirectoryChatSource::new(&chats)).expect("watcher");
        manager.run(&watcher, async {}).await.expect("run");

        assert!(!manager.is_dirty());
        assert!(temp.path().join("stats.json").exists());
    }
}
