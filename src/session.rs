use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{LogCategory, OutboundEvent};

pub type SessionId = Uuid;

/// One connected client.
///
/// Cloning is cheap; all clones refer to the same outbound queue, closed
/// signal and task bookkeeping. Work spawned on behalf of the client holds a
/// clone and sends through [`Session::send`], which never blocks.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<OutboundEvent>,
    /// Cancelled once the session leaves the registry. Subscription tokens
    /// are children of this one.
    closed: CancellationToken,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
    subscriptions: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Registration of a live subscription process on a session.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub key: String,
    pub cancel: CancellationToken,
    id: u64,
}

impl Session {
    fn new(outbound: mpsc::Sender<OutboundEvent>, closed: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            closed,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Enqueue an event for the client.
    ///
    /// Returns `false` when the event was dropped: either the session is
    /// closed or its queue is full. Never waits on the socket.
    pub fn send(&self, event: OutboundEvent) -> bool {
        if self.closed.is_cancelled() {
            tracing::debug!(session = %self.id, kind = event.kind(), "session closed, dropping event");
            return false;
        }
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(session = %self.id, kind = event.kind(), "outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(session = %self.id, kind = event.kind(), "outbound queue closed, dropping event");
                false
            }
        }
    }

    pub fn send_log(&self, category: LogCategory, text: impl Into<String>) -> bool {
        self.send(category.event(text))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the session closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Spawn work on behalf of this session and track it until it finishes.
    ///
    /// Tracked work is not cancelled when the session closes; its output is
    /// simply dropped by [`Session::send`]. [`Session::abort_in_flight`]
    /// stops it explicitly.
    pub fn spawn_tracked<F>(&self, label: &'static str, work: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let session = self.id;

        // Hold the lock across spawn so the task cannot deregister before it
        // has been registered.
        let mut guard = self.tasks.lock();
        let handle = tokio::spawn(async move {
            work.await;
            tasks.lock().remove(&task_id);
            tracing::trace!(%session, task = task_id, label, "session task finished");
        });
        guard.insert(task_id, handle.abort_handle());
        task_id
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn abort_in_flight(&self) -> usize {
        let drained: Vec<AbortHandle> = self.tasks.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    /// Register a subscription under `key`. An existing subscription with
    /// the same key is cancelled and replaced.
    pub fn register_subscription(&self, key: impl Into<String>) -> SubscriptionHandle {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.closed.child_token();
        let previous = self
            .subscriptions
            .lock()
            .insert(key.clone(), (id, cancel.clone()));
        if let Some((_, previous)) = previous {
            tracing::info!(session = %self.id, subscription = %key, "replacing existing subscription");
            previous.cancel();
        }
        SubscriptionHandle { key, cancel, id }
    }

    /// Forget a subscription once its process has ended. A newer
    /// registration under the same key is left alone.
    pub fn release_subscription(&self, handle: &SubscriptionHandle) {
        let mut subs = self.subscriptions.lock();
        if subs.get(&handle.key).is_some_and(|(id, _)| *id == handle.id) {
            subs.remove(&handle.key);
        }
    }

    pub fn subscription_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn cancel_subscriptions(&self) -> usize {
        let drained: Vec<(String, (u64, CancellationToken))> =
            self.subscriptions.lock().drain().collect();
        for (_, (_, token)) in &drained {
            token.cancel();
        }
        drained.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("maximum number of clients reached")]
    MaxSessionsReached,
}

struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    max_sessions: Option<usize>,
}

/// All currently connected clients, keyed by session id.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    outbound_capacity: usize,
    /// Parent of every session's closed token.
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

    pub fn new(shutdown: CancellationToken) -> Self {
        Self::with_limits(shutdown, Self::DEFAULT_OUTBOUND_CAPACITY, None)
    }

    pub fn with_limits(
        shutdown: CancellationToken,
        outbound_capacity: usize,
        max_sessions: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                max_sessions,
            })),
            outbound_capacity: outbound_capacity.max(1),
            shutdown,
        }
    }

    /// Create and register a session, returning it with the receiving end
    /// of its outbound queue.
    pub fn admit(&self) -> Result<(Session, mpsc::Receiver<OutboundEvent>), RegistryError> {
        let mut inner = self.inner.write();
        if let Some(max) = inner.max_sessions {
            if inner.sessions.len() >= max {
                return Err(RegistryError::MaxSessionsReached);
            }
        }
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let session = Session::new(tx, self.shutdown.child_token());
        inner.sessions.insert(session.id(), session.clone());
        tracing::info!(session = %session.id(), clients = inner.sessions.len(), "client registered");
        Ok((session, rx))
    }

    /// Remove a session and close it, cancelling its subscriptions.
    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(id);
        if let Some(ref session) = removed {
            let cancelled = session.cancel_subscriptions();
            session.close();
            tracing::info!(
                session = %id,
                clients = inner.sessions.len(),
                subscriptions = cancelled,
                "client unregistered"
            );
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Close every session and abort their in-flight work. Used on shutdown.
    pub fn drain(&self) -> usize {
        let drained: Vec<Session> = {
            let mut inner = self.inner.write();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.cancel_subscriptions();
            session.close();
            session.abort_in_flight();
        }
        drained.len()
    }
}
