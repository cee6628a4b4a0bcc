//! Identity → live sessions table.
//!
//! The registry is plain data owned by the dispatcher loop; it is never
//! shared behind a lock. A session is present while its pumps run, and an
//! identity key exists only while it has at least one session.

use std::collections::HashMap;
use std::sync::Arc;

use cupid_core::{Identity, SessionId};

use super::connection::{CloseReason, Session};

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions the frame was queued for.
    pub enqueued: usize,
    /// Sessions evicted because their mailbox refused the frame.
    pub evicted: usize,
}

/// Live sessions grouped by identity.
#[derive(Debug, Default)]
pub struct Registry {
    users: HashMap<Identity, HashMap<SessionId, Arc<Session>>>,
    sessions: usize,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session under its identity.
    ///
    /// A session that is already closed is not inserted; returns whether the
    /// entry was added.
    pub fn insert(&mut self, session: Arc<Session>) -> bool {
        if session.is_closed() {
            return false;
        }
        let set = self.users.entry(session.identity().clone()).or_default();
        if set.insert(session.id().clone(), session).is_none() {
            self.sessions += 1;
        }
        true
    }

    /// Remove one session. Missing entries are ignored.
    pub fn remove(&mut self, identity: &Identity, session_id: &SessionId) -> Option<Arc<Session>> {
        let set = self.users.get_mut(identity)?;
        let removed = set.remove(session_id)?;
        if set.is_empty() {
            let _ = self.users.remove(identity);
        }
        self.sessions -= 1;
        Some(removed)
    }

    /// Queue `frame` on every session of `identity`.
    ///
    /// Sessions whose mailbox refuses the frame are removed and closed as
    /// slow consumers.
    pub fn deliver(&mut self, identity: &Identity, frame: &Arc<String>) -> Delivery {
        let Some(set) = self.users.get_mut(identity) else {
            return Delivery::default();
        };
        let delivery = deliver_to_set(set, frame);
        if set.is_empty() {
            let _ = self.users.remove(identity);
        }
        self.sessions -= delivery.removed;
        delivery.outcome
    }

    /// Queue `frame` on every live session.
    pub fn broadcast(&mut self, frame: &Arc<String>) -> Delivery {
        let mut total = Delivery::default();
        let mut removed = 0;
        self.users.retain(|_, set| {
            let delivery = deliver_to_set(set, frame);
            total.enqueued += delivery.outcome.enqueued;
            total.evicted += delivery.outcome.evicted;
            removed += delivery.removed;
            !set.is_empty()
        });
        self.sessions -= removed;
        total
    }

    /// Remove and return every session of `identity`.
    pub fn drain_user(&mut self, identity: &Identity) -> Vec<Arc<Session>> {
        let Some(set) = self.users.remove(identity) else {
            return Vec::new();
        };
        self.sessions -= set.len();
        set.into_values().collect()
    }

    /// Remove and return every session.
    pub fn drain_all(&mut self) -> Vec<Arc<Session>> {
        self.sessions = 0;
        self.users
            .drain()
            .flat_map(|(_, set)| set.into_values())
            .collect()
    }

    /// Whether `identity` has at least one live session.
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.users.contains_key(identity)
    }

    /// Number of distinct online identities.
    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    /// Number of live sessions across all identities.
    pub fn session_count(&self) -> usize {
        self.sessions
    }

    /// Number of live sessions of one identity.
    pub fn sessions_of(&self, identity: &Identity) -> usize {
        self.users.get(identity).map_or(0, HashMap::len)
    }
}

struct SetDelivery {
    outcome: Delivery,
    removed: usize,
}

fn deliver_to_set(set: &mut HashMap<SessionId, Arc<Session>>, frame: &Arc<String>) -> SetDelivery {
    let mut outcome = Delivery::default();
    let mut removed = 0;
    set.retain(|_, session| {
        if session.enqueue(Arc::clone(frame)) {
            outcome.enqueued += 1;
            return true;
        }
        // Already-closed sessions keep their first reason
        if session.evict(CloseReason::SlowConsumer) {
            outcome.evicted += 1;
        }
        removed += 1;
        false
    });
    SetDelivery { outcome, removed }
}
