//! Outstanding requests waiting for a reply.
//!
//! The table is owned by the connection task; every operation runs there, so
//! registration and resolution never race.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
};

use tokio::sync::oneshot;

use super::protocol::Envelope;
use crate::error::RequestError;

/// What a pending request eventually resolves to.
pub type ReplyResult = Result<Envelope, RequestError>;

/// Completes a pending request.
pub type Waiter = oneshot::Sender<ReplyResult>;

/// How replies are matched to requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Each request carries a fresh `requestId`. Replies echoing it resolve
    /// exactly that request; replies without one resolve the oldest request
    /// of the same message type.
    #[default]
    RequestId,
    /// The message type is the key and nothing extra goes on the wire. Only
    /// one request per message type can be outstanding: registering a second
    /// one orphans the first, which then never resolves.
    MessageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    MessageType(String),
    RequestId(u64),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageType(message_type) => write!(f, "{message_type}"),
            Self::RequestId(id) => write!(f, "#{id}"),
        }
    }
}

struct Entry {
    message_type: String,
    waiter: Waiter,
}

#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<CorrelationKey, Entry>,
    /// Request ids per message type, oldest first.
    by_type: HashMap<String, VecDeque<u64>>,
    /// Waiters displaced by a newer registration under the same key. Held
    /// so their callers stay pending instead of seeing a hang-up.
    orphaned: Vec<Waiter>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiving end of its reply.
    #[cfg(test)]
    pub fn register(
        &mut self,
        key: CorrelationKey,
        message_type: &str,
    ) -> oneshot::Receiver<ReplyResult> {
        let (waiter, reply) = oneshot::channel();
        self.register_waiter(key, message_type, waiter);
        reply
    }

    /// Register a request whose reply channel was created by the caller.
    pub fn register_waiter(&mut self, key: CorrelationKey, message_type: &str, waiter: Waiter) {
        self.prune_orphans();
        if let CorrelationKey::RequestId(id) = key {
            self.by_type
                .entry(message_type.to_string())
                .or_default()
                .push_back(id);
        }

        let entry = Entry {
            message_type: message_type.to_string(),
            waiter,
        };
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            tracing::warn!(
                "Pending request {key} replaced by a newer one; the earlier caller will never be resolved"
            );
            self.orphaned.push(previous.waiter);
        }
    }

    /// Resolve the request `envelope` answers, if any. Returns whether a
    /// request was resolved; unmatched replies are dropped.
    pub fn resolve_and_remove(&mut self, envelope: Envelope) -> bool {
        let Some(key) = self.match_key(&envelope) else {
            return false;
        };
        self.complete(&key, Ok(envelope))
    }

    /// Stop waiting for `key`, resolving its caller with `reason`.
    pub fn abandon(&mut self, key: &CorrelationKey, reason: RequestError) -> bool {
        let abandoned = self.complete(key, Err(reason));
        if abandoned {
            tracing::warn!("Abandoned pending request {key}: {reason}");
        }
        abandoned
    }

    /// Drop the entry under `key` if its caller has already stopped waiting.
    ///
    /// Used when a caller gives up on its own: under type-keyed correlation
    /// the entry may belong to a newer caller by now, and that one is left
    /// alone.
    pub fn release(&mut self, key: &CorrelationKey, reason: RequestError) -> bool {
        let unwanted = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.waiter.is_closed());
        self.prune_orphans();
        unwanted && self.abandon(key, reason)
    }

    /// Whether `envelope` would resolve a pending request.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.match_key(envelope).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of callers that were displaced and will never be resolved.
    pub fn orphaned(&self) -> usize {
        self.orphaned.len()
    }

    /// Only entries whose caller is still listening can be matched.
    fn match_key(&self, envelope: &Envelope) -> Option<CorrelationKey> {
        let live = |key: &CorrelationKey| {
            self.entries
                .get(key)
                .filter(|entry| entry.message_type == envelope.message_type)
                .is_some_and(|entry| !entry.waiter.is_closed())
        };

        if let Some(id) = envelope.request_id {
            // Ids are only unique on our side; the peer may number its own
            // messages, so the type has to agree as well.
            let key = CorrelationKey::RequestId(id);
            return live(&key).then_some(key);
        }

        let key = CorrelationKey::MessageType(envelope.message_type.clone());
        if live(&key) {
            return Some(key);
        }

        self.by_type
            .get(&envelope.message_type)?
            .iter()
            .map(|id| CorrelationKey::RequestId(*id))
            .find(|key| live(key))
    }

    /// Forget displaced callers that stopped waiting.
    fn prune_orphans(&mut self) {
        self.orphaned.retain(|waiter| !waiter.is_closed());
    }

    fn complete(&mut self, key: &CorrelationKey, result: ReplyResult) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };

        if let CorrelationKey::RequestId(id) = key {
            if let Some(ids) = self.by_type.get_mut(&entry.message_type) {
                ids.retain(|queued| queued != id);
                if ids.is_empty() {
                    self.by_type.remove(&entry.message_type);
                }
            }
        }

        if entry.waiter.send(result).is_err() {
            tracing::debug!("Caller of {key} stopped waiting before the reply arrived");
        }
        true
    }
}
