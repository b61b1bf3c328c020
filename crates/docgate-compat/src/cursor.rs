//! Server-side cursor table
//!
//! A cursor wraps a lazy backend stream and hands it out in batches. Fetches
//! on one cursor are serialized by a per-cursor async mutex held across the
//! batch fetch; different cursors never wait on each other. A cursor is
//! removed from the table as soon as its final batch has been produced.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::Peekable;
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docgate_common::metrics;

use crate::backend::DocumentStream;
use crate::context::SessionId;
use crate::error::CommandError;

pub type CursorId = i64;

struct CursorState {
    stream: Peekable<DocumentStream>,
}

struct CursorEntry {
    namespace: String,
    session: SessionId,
    batch_size: usize,
    state: tokio::sync::Mutex<CursorState>,
    last_used: parking_lot::Mutex<Instant>,
}

/// One page of cursor results
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub documents: Vec<Document>,
    /// No documents remain; the cursor has been released
    pub exhausted: bool,
}

/// Table of open cursors shared by all sessions
pub struct CursorManager {
    cursors: DashMap<CursorId, Arc<CursorEntry>>,
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }

    /// Register a stream and return its fresh id.
    ///
    /// `batch_size` is used by [`next_batch`](Self::next_batch) calls that do
    /// not ask for a size.
    pub fn create(
        &self,
        stream: DocumentStream,
        batch_size: usize,
        namespace: impl Into<String>,
        session: SessionId,
    ) -> CursorId {
        let entry = Arc::new(CursorEntry {
            namespace: namespace.into(),
            session,
            batch_size,
            state: tokio::sync::Mutex::new(CursorState {
                stream: stream.peekable(),
            }),
            last_used: parking_lot::Mutex::new(Instant::now()),
        });

        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate = rng.gen_range(1..=CursorId::MAX);
            if let Entry::Vacant(slot) = self.cursors.entry(candidate) {
                slot.insert(Arc::clone(&entry));
                break candidate;
            }
        };

        debug!(cursor_id = id, namespace = %entry.namespace, "Cursor created");
        metrics::set_open_cursors(self.cursors.len());
        id
    }

    /// Fetch up to `batch_size` documents (the cursor's own size when `None`).
    ///
    /// Fails with `CursorNotFound` for unknown or released ids. A backend
    /// error releases the cursor.
    pub async fn next_batch(
        &self,
        id: CursorId,
        batch_size: Option<usize>,
    ) -> Result<Batch, CommandError> {
        let entry = self
            .cursors
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CommandError::cursor_not_found(id))?;

        let mut state = entry.state.lock().await;
        // Killed or exhausted while this call waited for the lock
        if !self.cursors.contains_key(&id) {
            return Err(CommandError::cursor_not_found(id));
        }

        let wanted = batch_size.unwrap_or(entry.batch_size);
        let mut documents = Vec::with_capacity(wanted.min(1024));
        let mut exhausted = false;

        while documents.len() < wanted {
            match state.stream.next().await {
                Some(Ok(doc)) => documents.push(doc),
                Some(Err(err)) => {
                    self.release(id);
                    return Err(err.into());
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        if !exhausted && wanted > 0 {
            exhausted = Pin::new(&mut state.stream).peek().await.is_none();
        }

        *entry.last_used.lock() = Instant::now();
        drop(state);

        if exhausted {
            self.release(id);
        }
        metrics::record_batch(documents.len());
        Ok(Batch {
            documents,
            exhausted,
        })
    }

    /// Namespace the cursor was opened on
    #[must_use]
    pub fn namespace(&self, id: CursorId) -> Option<String> {
        self.cursors.get(&id).map(|e| e.namespace.clone())
    }

    /// Remove a cursor; returns whether it was registered
    pub fn kill(&self, id: CursorId) -> bool {
        let killed = self.release(id);
        if killed {
            debug!(cursor_id = id, "Cursor killed");
        }
        killed
    }

    /// Remove every cursor owned by `session`
    pub fn kill_session(&self, session: SessionId) -> usize {
        let before = self.cursors.len();
        self.cursors.retain(|_, entry| entry.session != session);
        let killed = before.saturating_sub(self.cursors.len());
        if killed > 0 {
            debug!(session, killed, "Session cursors killed");
            metrics::set_open_cursors(self.cursors.len());
        }
        killed
    }

    /// Remove cursors unused for longer than `max_idle`.
    ///
    /// Cursors with a fetch in progress are left alone.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<CursorId> = self
            .cursors
            .iter()
            .filter(|e| {
                now.duration_since(*e.last_used.lock()) > max_idle && e.state.try_lock().is_ok()
            })
            .map(|e| *e.key())
            .collect();

        let reaped = idle.into_iter().filter(|id| self.release(*id)).count();
        if reaped > 0 {
            info!(reaped, "Reaped idle cursors");
            metrics::record_cursors_reaped(reaped);
        }
        reaped
    }

    /// Periodically reap idle cursors until `shutdown` fires
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.reap_idle(max_idle);
                    }
                }
            }
            debug!("Cursor reaper stopped");
        })
    }

    #[must_use]
    pub fn live_ids(&self) -> Vec<CursorId> {
        self.cursors.iter().map(|e| *e.key()).collect()
    }

    #[must_use]
    pub fn contains(&self, id: CursorId) -> bool {
        self.cursors.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    fn release(&self, id: CursorId) -> bool {
        let removed = self.cursors.remove(&id).is_some();
        if removed {
            metrics::set_open_cursors(self.cursors.len());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::error::{ErrorCode, ErrorKind};
    use bson::doc;
    use futures::stream;
    use proptest::prelude::*;

    fn numbers(n: i32) -> DocumentStream {
        stream::iter((0..n).map(|i| Ok(doc! { "i": i }))).boxed()
    }

    #[tokio::test]
    async fn test_batches_until_exhausted() {
        let cursors = CursorManager::new();
        let id = cursors.create(numbers(5), 2, "test.c", 1);
        assert!(id > 0);
        assert_eq!(cursors.namespace(id).as_deref(), Some("test.c"));

        let batch = cursors.next_batch(id, None).await.unwrap();
        assert_eq!(batch.documents.len(), 2);
        assert!(!batch.exhausted);

        let batch = cursors.next_batch(id, Some(3)).await.unwrap();
        assert_eq!(batch.documents.len(), 3);
        assert!(batch.exhausted, "peek detects the end on an exact fit");
        assert!(!cursors.contains(id));

        let err = cursors.next_batch(id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CursorNotFound);
    }

    #[tokio::test]
    async fn test_zero_sized_batch_keeps_cursor() {
        let cursors = CursorManager::new();
        let id = cursors.create(numbers(1), 0, "test.c", 1);
        let batch = cursors.next_batch(id, None).await.unwrap();
        assert!(batch.documents.is_empty());
        assert!(!batch.exhausted);
        assert!(cursors.contains(id));
    }

    #[tokio::test]
    async fn test_stream_error_releases_cursor() {
        let cursors = CursorManager::new();
        let failing = stream::iter(vec![
            Ok(doc! { "i": 1 }),
            Err(BackendError::internal("disk on fire")),
        ])
        .boxed();
        let id = cursors.create(failing, 1, "test.c", 1);

        assert_eq!(cursors.next_batch(id, None).await.unwrap().documents.len(), 1);
        let err = cursors.next_batch(id, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(!cursors.contains(id));
    }

    #[tokio::test]
    async fn test_kill_session() {
        let cursors = CursorManager::new();
        let a = cursors.create(numbers(3), 1, "test.c", 1);
        let b = cursors.create(numbers(3), 1, "test.c", 1);
        let c = cursors.create(numbers(3), 1, "test.c", 2);

        assert_eq!(cursors.kill_session(1), 2);
        assert!(!cursors.contains(a) && !cursors.contains(b));
        assert_eq!(cursors.live_ids(), vec![c]);
        assert!(cursors.kill(c));
        assert!(!cursors.kill(c));
        assert!(cursors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle() {
        let cursors = CursorManager::new();
        let stale = cursors.create(numbers(3), 1, "test.c", 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = cursors.create(numbers(3), 1, "test.c", 1);

        assert_eq!(cursors.reap_idle(Duration::from_secs(10)), 1);
        assert!(!cursors.contains(stale));
        assert!(cursors.contains(fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_stops_on_shutdown() {
        let cursors = Arc::new(CursorManager::new());
        let id = cursors.create(numbers(3), 1, "test.c", 1);
        let shutdown = CancellationToken::new();
        let handle = cursors.spawn_reaper(Duration::from_secs(1), Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!cursors.contains(id));

        shutdown.cancel();
        handle.await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_kill_leaves_remaining_ids(n in 1usize..40, m_seed in any::<usize>()) {
            let m = m_seed % (n + 1);
            let cursors = CursorManager::new();
            let ids: Vec<CursorId> = (0..n)
                .map(|_| cursors.create(stream::empty().boxed(), 1, "test.c", 1))
                .collect();

            let mut unique = ids.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), n);
            prop_assert!(ids.iter().all(|id| *id > 0));

            for id in &ids[..m] {
                prop_assert!(cursors.kill(*id));
            }
            let mut live = cursors.live_ids();
            live.sort_unstable();
            let mut expected = ids[m..].to_vec();
            expected.sort_unstable();
            prop_assert_eq!(live, expected);
        }
    }
}
