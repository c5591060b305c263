//! Message history and request correlation for a single session.

use crate::message::{Message, RequestId};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One message that crossed the wire.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub message: Message,
    pub timestamp: Instant,
    pub wall_time: DateTime<Local>,
    /// `HH:MM:SS` in local time.
    pub formatted_time: String,
    /// Set on received entries whose `id` matched a pending request.
    pub response_time: Option<Duration>,
}

impl HistoryEntry {
    fn new(direction: Direction, message: Message, timestamp: Instant) -> Self {
        let wall_time = Local::now();
        Self {
            direction,
            message,
            timestamp,
            formatted_time: wall_time.format("%H:%M:%S").to_string(),
            wall_time,
            response_time: None,
        }
    }
}

/// Undo information for a pending entry registered ahead of a write.
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    id: RequestId,
    at: Instant,
    replaced: Option<Instant>,
}

#[derive(Debug)]
pub struct MessageStore {
    history: Vec<HistoryEntry>,
    pending: BTreeMap<RequestId, Instant>,
    next_id: RequestId,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            pending: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Append a sent entry and start tracking its `id`, if it has one.
    pub fn record_sent(&mut self, message: Message) {
        let now = Instant::now();
        if let Some(id) = message.id() {
            let _ = self.reserve_pending(id, now);
        }
        self.commit_sent(message, now);
    }

    /// Track `id` as in flight from `at`. A stale entry with the same id is
    /// overwritten and its send time lost.
    pub fn reserve_pending(&mut self, id: RequestId, at: Instant) -> Reservation {
        let replaced = self.pending.insert(id, at);
        if replaced.is_some() {
            tracing::warn!(id, "request id reused while still pending; earlier send time dropped");
        }
        Reservation { id, at, replaced }
    }

    /// Append the history entry for a message whose bytes were written at `at`.
    ///
    /// History stays in timestamp order: a reply that raced ahead of this
    /// commit is kept after the request it answers.
    pub fn commit_sent(&mut self, message: Message, at: Instant) {
        let position = self.history.partition_point(|entry| entry.timestamp <= at);
        self.history
            .insert(position, HistoryEntry::new(Direction::Sent, message, at));
    }

    /// Roll back a reservation whose write failed.
    pub fn release(&mut self, reservation: Reservation) {
        let Reservation { id, at, replaced } = reservation;
        // A reply may already have consumed the entry; only undo our own.
        if self.pending.get(&id) != Some(&at) {
            return;
        }
        match replaced {
            Some(previous) => {
                self.pending.insert(id, previous);
            }
            None => {
                self.pending.remove(&id);
            }
        }
    }

    /// Append a received entry, resolving its pending request if any.
    pub fn record_received(&mut self, message: Message) -> Option<Duration> {
        let now = Instant::now();
        let response_time = message
            .id()
            .and_then(|id| self.pending.remove(&id))
            .map(|sent_at| now.saturating_duration_since(sent_at));

        let mut entry = HistoryEntry::new(Direction::Received, message, now);
        entry.response_time = response_time;
        self.history.push(entry);
        response_time
    }

    pub fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The id the next [`MessageStore::allocate_id`] call will return.
    pub fn peek_next_id(&self) -> RequestId {
        self.next_id
    }

    /// Distinct `search` terms from sent requests, newest first.
    ///
    /// Only string `params` count; searches whose `params` is an object,
    /// array, number or null are skipped. Walks the full history on every
    /// call; nothing is cached between calls.
    pub fn recent_search_terms(&self, limit: usize) -> impl Iterator<Item = &str> + '_ {
        let mut seen = HashSet::new();
        self.history
            .iter()
            .rev()
            .filter(|entry| entry.direction == Direction::Sent)
            .filter(|entry| entry.message.method() == Some("search"))
            .filter_map(|entry| entry.message.params().and_then(|p| p.as_str()))
            .filter(move |term| seen.insert(*term))
            .take(limit)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pending request ids in ascending order.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.pending.keys().copied().collect()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop the history. Pending requests stay tracked.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}
