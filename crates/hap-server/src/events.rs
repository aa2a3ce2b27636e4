//! Per-session subscriptions and event fan-out.
//!
//! Each session registers a bounded channel. Value changes are published
//! to every subscriber of the `(aid, iid)` topic except the originating
//! session; the session loop coalesces queued events before writing
//! EVENT messages. A session whose queue overflows is evicted (its
//! channel drops, which the session loop treats as a close).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Session identifier, unique for the lifetime of the server.
pub type SessionId = u64;

/// Depth of each session's event queue.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Messages delivered to a session loop.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// A characteristic changed; coalesce and emit an EVENT.
    Event { aid: u64, iid: u64, value: Value },
    /// The server asks the session to close (e.g. last admin unpaired).
    Close,
}

#[derive(Default)]
struct RegistryInner {
    topics: HashMap<(u64, u64), HashSet<SessionId>>,
    sessions: HashMap<SessionId, mpsc::Sender<SessionMessage>>,
}

/// Shared registry of sessions and their subscriptions.
///
/// The lock is held only for map access; channel sends use `try_send` and
/// never block inside the lock.
#[derive(Default)]
pub struct EventRegistry {
    inner: Mutex<RegistryInner>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the event channel for a new session.
    pub fn register_session(&self, session: SessionId) -> mpsc::Receiver<SessionMessage> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let mut inner = self.inner.lock().expect("event registry poisoned");
        inner.sessions.insert(session, tx);
        rx
    }

    /// Toggle a session's subscription for one characteristic.
    pub fn subscribe(&self, session: SessionId, aid: u64, iid: u64, subscribed: bool) {
        let mut inner = self.inner.lock().expect("event registry poisoned");
        if subscribed {
            inner.topics.entry((aid, iid)).or_default().insert(session);
            debug!("session {session} subscribed to {aid}.{iid}");
        } else if let Some(subscribers) = inner.topics.get_mut(&(aid, iid)) {
            subscribers.remove(&session);
            if subscribers.is_empty() {
                inner.topics.remove(&(aid, iid));
            }
            debug!("session {session} unsubscribed from {aid}.{iid}");
        }
    }

    /// Whether a session currently subscribes to a characteristic.
    pub fn is_subscribed(&self, session: SessionId, aid: u64, iid: u64) -> bool {
        let inner = self.inner.lock().expect("event registry poisoned");
        inner
            .topics
            .get(&(aid, iid))
            .map(|subscribers| subscribers.contains(&session))
            .unwrap_or(false)
    }

    /// Remove a closed session from every topic.
    pub fn connection_lost(&self, session: SessionId) {
        let mut inner = self.inner.lock().expect("event registry poisoned");
        inner.sessions.remove(&session);
        inner.topics.retain(|_, subscribers| {
            subscribers.remove(&session);
            !subscribers.is_empty()
        });
    }

    /// Fan a value change out to all subscribers except the originator.
    ///
    /// A full queue evicts the session: the controller is expected to
    /// reconnect and resubscribe.
    pub fn publish(&self, aid: u64, iid: u64, value: &Value, originator: Option<SessionId>) {
        let targets: Vec<(SessionId, mpsc::Sender<SessionMessage>)> = {
            let inner = self.inner.lock().expect("event registry poisoned");
            let Some(subscribers) = inner.topics.get(&(aid, iid)) else {
                return;
            };
            subscribers
                .iter()
                .filter(|session| Some(**session) != originator)
                .filter_map(|session| {
                    inner
                        .sessions
                        .get(session)
                        .map(|tx| (*session, tx.clone()))
                })
                .collect()
        };

        let mut evicted = Vec::new();
        for (session, tx) in targets {
            let message = SessionMessage::Event {
                aid,
                iid,
                value: value.clone(),
            };
            if tx.try_send(message).is_err() {
                warn!("session {session} event queue overflow, evicting");
                evicted.push(session);
            }
        }
        for session in evicted {
            self.connection_lost(session);
        }
    }

    /// Ask every session to close (pairing registry was wiped).
    pub fn close_all(&self) {
        let targets: Vec<mpsc::Sender<SessionMessage>> = {
            let inner = self.inner.lock().expect("event registry poisoned");
            inner.sessions.values().cloned().collect()
        };
        for tx in targets {
            let _ = tx.try_send(SessionMessage::Close);
        }
    }

    /// Number of registered sessions (diagnostics).
    pub fn session_count(&self) -> usize {
        let inner = self.inner.lock().expect("event registry poisoned");
        inner.sessions.len()
    }
}
