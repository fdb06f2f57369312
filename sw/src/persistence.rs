//! Persistence of façade snapshots
//!
//! Façades hand their merged domain state to an [`AutoSaver`], which writes
//! dirty snapshots through a [`Persistence`] backend on a fixed interval.
//! A failed save is logged and retried on the next cycle; in-memory state is
//! never touched by the saver.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use snapstore::SnapStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::events::{Emitter, LogLevel};

/// Key/value persistence consumed by the façades
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError>;

    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError>;
}

/// In-process persistence, lost on exit
#[derive(Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        self.values.lock().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.lock().await.get(key).cloned())
    }
}

/// Persistence backed by a snapshot directory
///
/// File I/O runs on the blocking pool.
pub struct SnapPersistence {
    store: Arc<SnapStore>,
}

impl SnapPersistence {
    pub fn open(dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(dir = %dir.as_ref().display(), "SnapPersistence::open: called");
        Ok(Self {
            store: Arc::new(SnapStore::open(dir)?),
        })
    }
}

#[async_trait]
impl Persistence for SnapPersistence {
    async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        let store = self.store.clone();
        let key = key.to_string();
        let value = value.clone();
        tokio::task::spawn_blocking(move || store.put(&key, &value))
            .await
            .map_err(|e| PersistenceError::Store(e.to_string()))?
            .map_err(|e| PersistenceError::Store(format!("{:#}", e)))
    }

    async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let store = self.store.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| PersistenceError::Store(e.to_string()))?
            .map_err(|e| PersistenceError::Store(format!("{:#}", e)))
    }
}

/// Outcome of one save cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

/// Background saver of dirty snapshots
pub struct AutoSaver {
    persistence: Arc<dyn Persistence>,
    /// Latest unsaved snapshot per key
    dirty: Mutex<HashMap<String, Value>>,
    emitter: Emitter,
}

impl AutoSaver {
    pub fn new(persistence: Arc<dyn Persistence>, emitter: Emitter) -> Self {
        Self {
            persistence,
            dirty: Mutex::new(HashMap::new()),
            emitter,
        }
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Queue a snapshot for the next save cycle, replacing any older one
    pub async fn mark_dirty(&self, key: &str, snapshot: Value) {
        debug!(%key, "mark_dirty: called");
        self.dirty.lock().await.insert(key.to_string(), snapshot);
    }

    pub async fn is_dirty(&self, key: &str) -> bool {
        self.dirty.lock().await.contains_key(key)
    }

    /// Save every dirty snapshot now
    ///
    /// Failed keys stay dirty unless a newer snapshot arrived meanwhile.
    pub async fn flush(&self) -> FlushReport {
        let pending: Vec<(String, Value)> = self.dirty.lock().await.drain().collect();
        let mut report = FlushReport::default();

        for (key, value) in pending {
            match self.persistence.save(&key, &value).await {
                Ok(()) => {
                    debug!(%key, "flush: saved");
                    report.saved += 1;
                }
                Err(e) => {
                    warn!(%key, error = %e, "Autosave failed, will retry next cycle");
                    self.emitter
                        .log(LogLevel::Warn, format!("autosave of {} failed: {}", key, e));
                    self.dirty.lock().await.entry(key).or_insert(value);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Run save cycles until `cancel` fires, then flush once more
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        info!(?interval, "AutoSaver started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.flush().await;
                        debug!("AutoSaver stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventBus};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Fails every save while `failing` is set
    #[derive(Default)]
    struct FlakyPersistence {
        inner: MemoryPersistence,
        failing: AtomicBool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Persistence for FlakyPersistence {
        async fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PersistenceError::Store("disk full".to_string()));
            }
            self.inner.save(key, value).await
        }

        async fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
            self.inner.load(key).await
        }
    }

    #[tokio::test]
    async fn test_memory_persistence() {
        let p = MemoryPersistence::new();
        assert!(p.load("a").await.unwrap().is_none());
        p.save("a", &json!({"x": 1})).await.unwrap();
        assert_eq!(p.load("a").await.unwrap(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_snap_persistence_roundtrip() {
        let temp = tempdir().unwrap();
        let p = SnapPersistence::open(temp.path()).unwrap();
        p.save("codegen", &json!({"files": {"a.rs": "fn main() {}"}})).await.unwrap();

        let reopened = SnapPersistence::open(temp.path()).unwrap();
        assert_eq!(
            reopened.load("codegen").await.unwrap(),
            Some(json!({"files": {"a.rs": "fn main() {}"}}))
        );
        assert!(reopened.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_saves_latest_snapshot() {
        let bus = EventBus::new(10);
        let persistence = Arc::new(MemoryPersistence::new());
        let saver = AutoSaver::new(persistence.clone(), bus.emitter_for("run"));

        saver.mark_dirty("requirements", json!({"v": 1})).await;
        saver.mark_dirty("requirements", json!({"v": 2})).await;
        assert!(saver.is_dirty("requirements").await);

        let report = saver.flush().await;
        assert_eq!(report, FlushReport { saved: 1, failed: 0 });
        assert!(!saver.is_dirty("requirements").await);
        assert_eq!(persistence.load("requirements").await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_failed_save_is_retried_next_cycle() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let persistence = Arc::new(FlakyPersistence::default());
        persistence.failing.store(true, Ordering::SeqCst);
        let saver = AutoSaver::new(persistence.clone(), bus.emitter_for("run"));

        saver.mark_dirty("design", json!({"diagrams": {}})).await;
        let report = saver.flush().await;
        assert_eq!(report.failed, 1);
        assert!(saver.is_dirty("design").await);

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, Event::Log { level: LogLevel::Warn, .. }));

        persistence.failing.store(false, Ordering::SeqCst);
        let report = saver.flush().await;
        assert_eq!(report.saved, 1);
        assert_eq!(persistence.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(persistence.load("design").await.unwrap(), Some(json!({"diagrams": {}})));
    }

    #[tokio::test]
    async fn test_newer_snapshot_not_overwritten_by_retry() {
        let bus = EventBus::new(10);
        let persistence = Arc::new(FlakyPersistence::default());
        persistence.failing.store(true, Ordering::SeqCst);
        let saver = AutoSaver::new(persistence.clone(), bus.emitter_for("run"));

        saver.mark_dirty("k", json!(1)).await;
        saver.flush().await;
        saver.mark_dirty("k", json!(2)).await;

        persistence.failing.store(false, Ordering::SeqCst);
        saver.flush().await;
        assert_eq!(persistence.load("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_spawned_saver_flushes_on_cancel() {
        let bus = EventBus::new(10);
        let persistence = Arc::new(MemoryPersistence::new());
        let saver = Arc::new(AutoSaver::new(persistence.clone(), bus.emitter_for("run")));
        let cancel = CancellationToken::new();
        let handle = saver.clone().spawn(Duration::from_secs(3600), cancel.clone());

        saver.mark_dirty("codegen", json!({"files": {}})).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(persistence.load("codegen").await.unwrap(), Some(json!({"files": {}})));
    }
}
