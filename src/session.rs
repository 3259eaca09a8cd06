use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::bus::EventBus;
use crate::limits::MAX_SESSIONS;
use crate::model::DomainEvent;

pub const DEFAULT_SESSION_BUFFER: usize = 256;

pub type SessionId = Ulid;

struct SessionEntry {
    owner_id: String,
    tx: mpsc::Sender<DomainEvent>,
}

/// Holds one bounded delivery queue per live connection and fans every bus
/// event out to all of them, regardless of owner.
pub struct SessionHub {
    sessions: DashMap<SessionId, SessionEntry>,
    /// Registered sessions plus in-flight registrations; never above `max_sessions`.
    active: AtomicUsize,
    max_sessions: usize,
    buffer: usize,
}

impl SessionHub {
    /// Create the hub and spawn its fan-out task. The task exits once the bus
    /// is dropped or the hub itself is gone.
    pub fn start(bus: &EventBus, buffer: usize) -> Arc<Self> {
        Self::start_with_limit(bus, buffer, MAX_SESSIONS)
    }

    pub fn start_with_limit(bus: &EventBus, buffer: usize, max_sessions: usize) -> Arc<Self> {
        let hub = Arc::new(Self {
            sessions: DashMap::new(),
            active: AtomicUsize::new(0),
            max_sessions,
            buffer: buffer.max(1),
        });
        tokio::spawn(run_fanout(Arc::downgrade(&hub), bus.subscribe()));
        hub
    }

    /// Register a live connection. The returned [`Session`] is drained by the
    /// transport and unregisters itself when dropped. `None` once the session
    /// limit is reached.
    pub fn register(self: &Arc<Self>, owner_id: &str) -> Option<Session> {
        let reserved = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sessions).then_some(n + 1)
            });
        let Ok(prev) = reserved else {
            warn!("session limit reached, rejecting {owner_id}");
            return None;
        };
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Ulid::new();
        self.sessions.insert(
            id,
            SessionEntry {
                owner_id: owner_id.to_string(),
                tx,
            },
        );
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set((prev + 1) as f64);
        debug!("session {id} registered for {owner_id}");
        Some(Session {
            id,
            owner_id: owner_id.to_string(),
            rx,
            hub: Arc::downgrade(self),
        })
    }

    /// Remove a session. Idempotent; returns whether it was still registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            let now = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
            metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(now as f64);
            debug!("session {id} unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Push one event into every session queue without waiting. A session
    /// whose queue is full is torn down; its client re-fetches on reconnect.
    pub fn deliver(&self, event: &DomainEvent) {
        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "session {} ({}) saturated, tearing it down",
                        entry.key(),
                        entry.owner_id
                    );
                    dead.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("session {} closed", entry.key());
                    dead.push(*entry.key());
                }
            }
        }
        // removal after iteration: DashMap shards are read-locked while iterating
        for id in dead {
            if self.unregister(id) {
                metrics::counter!(crate::observability::SESSIONS_DROPPED_TOTAL).increment(1);
            }
        }
    }
}

async fn run_fanout(hub: Weak<SessionHub>, mut rx: broadcast::Receiver<DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match hub.upgrade() {
                Some(hub) => hub.deliver(&event),
                None => break,
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!("session fan-out lagged, {skipped} events dropped");
                metrics::counter!(crate::observability::EVENTS_DROPPED_TOTAL).increment(skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("session fan-out stopped");
}

/// One live connection's subscription to domain events.
pub struct Session {
    id: SessionId,
    owner_id: String,
    rx: mpsc::Receiver<DomainEvent>,
    hub: Weak<SessionHub>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Next event. `None` once the hub has torn this session down.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }

    /// Everything queued right now, in commit order, plus whether the hub has
    /// closed the queue.
    #[cfg(test)]
    pub fn drain(&mut self) -> (Vec<DomainEvent>, bool) {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(mpsc::error::TryRecvError::Empty) => return (events, false),
                Err(mpsc::error::TryRecvError::Disconnected) => return (events, true),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}
