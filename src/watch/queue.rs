//! Debounced change queue: coalesces filesystem events
//! behind a single settle timer and hands a partial-update batch to
//! whatever calls the indexer. The watcher itself (inotify/FSEvents) is
//! out of scope; this module only owns debounce/coalesce/flush semantics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const MIN_DEBOUNCE_MS: u64 = 50;

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_flush(&self, changes: Vec<String>, deletes: Vec<String>) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    changes: Vec<String>,
    deletes: Vec<String>,
    /// Bumped on every enqueue; a pending debounce timer compares its
    /// captured generation against the current one to tell whether it was
    /// superseded by a later event.
    generation: u64,
}

impl Inner {
    fn enqueue(&mut self, path: String, is_delete: bool) {
        if is_delete {
            self.changes.retain(|p| p != &path);
            if !self.deletes.contains(&path) {
                self.deletes.push(path);
            }
        } else {
            self.deletes.retain(|p| p != &path);
            if !self.changes.contains(&path) {
                self.changes.push(path);
            }
        }
        self.generation += 1;
    }

    fn drain(&mut self) -> (Vec<String>, Vec<String>) {
        (std::mem::take(&mut self.changes), std::mem::take(&mut self.deletes))
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }
}

pub struct ChangeQueue {
    debounce: Duration,
    handler: Arc<dyn ChangeHandler>,
    inner: Arc<Mutex<Inner>>,
    /// The "promise latch": a flush in progress is held
    /// here, so concurrent `flush()` callers simply await the same lock.
    flushing: Arc<Mutex<()>>,
}

impl ChangeQueue {
    pub fn new(debounce_ms: u64, handler: Arc<dyn ChangeHandler>) -> Self {
        Self {
            debounce: Duration::from_millis(debounce_ms.max(MIN_DEBOUNCE_MS)),
            handler,
            inner: Arc::new(Mutex::new(Inner::default())),
            flushing: Arc::new(Mutex::new(())),
        }
    }

    async fn enqueue(&self, path: String, is_delete: bool) {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.enqueue(path, is_delete);
            inner.generation
        };

        let inner = self.inner.clone();
        let flushing = self.flushing.clone();
        let handler = self.handler.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let still_current = {
                let guard = inner.lock().await;
                guard.generation == generation
            };
            if still_current {
                let _ = flush_inner(&inner, &flushing, &handler).await;
            }
        });
    }

    pub async fn enqueue_change(&self, path: impl Into<String>) {
        self.enqueue(path.into(), false).await;
    }

    pub async fn enqueue_delete(&self, path: impl Into<String>) {
        self.enqueue(path.into(), true).await;
    }

    pub async fn pending_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.changes.len() + inner.deletes.len()
    }

    /// Forces an immediate flush, ignoring the debounce timer. Safe to call
    /// concurrently: all callers serialize on `flushing` and a caller that
    /// arrives mid-flush re-flushes anything that accumulated meanwhile.
    pub async fn flush(&self) -> Result<()> {
        flush_inner(&self.inner, &self.flushing, &self.handler).await
    }

    /// Shutdown path: forces a flush, then waits up to
    /// `min(debounce, 200ms)` for any in-flight enqueue to settle, then
    /// flushes again if anything arrived in that window.
    pub async fn drain(&self) -> Result<()> {
        self.flush().await?;
        let settle = self.debounce.min(Duration::from_millis(200));
        tokio::time::sleep(settle).await;
        if !{
            let inner = self.inner.lock().await;
            inner.is_empty()
        } {
            self.flush().await?;
        }
        Ok(())
    }
}

async fn flush_inner(inner: &Arc<Mutex<Inner>>, flushing: &Arc<Mutex<()>>, handler: &Arc<dyn ChangeHandler>) -> Result<()> {
    let _guard = flushing.lock().await;
    loop {
        let (changes, deletes) = {
            let mut state = inner.lock().await;
            state.drain()
        };
        if changes.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        handler.on_flush(changes, deletes).await?;
    }
}

/// Dedup helper exposed for callers that build a change set from a raw
/// event stream before calling `enqueue_change`/`enqueue_delete` in bulk.
pub fn dedupe_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHandler {
        batches: Mutex<Vec<(Vec<String>, Vec<String>)>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChangeHandler for RecordingHandler {
        async fn on_flush(&self, changes: Vec<String>, deletes: Vec<String>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().await.push((changes, deletes));
            Ok(())
        }
    }

    #[tokio::test]
    async fn coalesces_events_within_the_debounce_window() {
        let handler = Arc::new(RecordingHandler { batches: Mutex::new(vec![]), calls: AtomicUsize::new(0) });
        let queue = ChangeQueue::new(20, handler.clone());

        queue.enqueue_change("src/new.ts").await;
        queue.enqueue_change("scripts/task.sh").await;
        queue.enqueue_change("src/start.ts").await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let batches = handler.batches.lock().await;
        assert_eq!(batches[0].0.len(), 3);
    }

    #[tokio::test]
    async fn a_later_delete_replaces_an_earlier_change_for_the_same_path() {
        let handler = Arc::new(RecordingHandler { batches: Mutex::new(vec![]), calls: AtomicUsize::new(0) });
        let queue = ChangeQueue::new(20, handler.clone());

        queue.enqueue_change("src/a.ts").await;
        queue.enqueue_delete("src/a.ts").await;
        queue.flush().await.unwrap();

        let batches = handler.batches.lock().await;
        assert_eq!(batches[0].0.len(), 0);
        assert_eq!(batches[0].1, vec!["src/a.ts".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_flush_calls_apply_the_union_exactly_once_each() {
        let handler = Arc::new(RecordingHandler { batches: Mutex::new(vec![]), calls: AtomicUsize::new(0) });
        let queue = Arc::new(ChangeQueue::new(20, handler.clone()));

        queue.enqueue_change("src/new.ts").await;
        queue.enqueue_change("scripts/task.sh").await;
        queue.enqueue_change("src/start.ts").await;

        let q1 = queue.clone();
        let q2 = queue.clone();
        let (r1, r2) = tokio::join!(tokio::spawn(async move { q1.flush().await }), tokio::spawn(async move { q2.flush().await }));
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();
        queue.drain().await.unwrap();

        let total: usize = handler.batches.lock().await.iter().map(|(c, _)| c.len()).sum();
        assert_eq!(total, 3);
        assert_eq!(queue.pending_count().await, 0);
    }
}
