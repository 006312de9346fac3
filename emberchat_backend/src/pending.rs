use crate::messages::{ChatMessage, MessageBody};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;

/// A message blocked on one or more unresolved media keys. The unresolved
/// set starts as the distinct keys extracted from the text at creation time
/// and only ever shrinks.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub message: ChatMessage,
    pub unresolved: HashSet<String>,
    pub queued_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn new(message: ChatMessage, unresolved: Vec<String>) -> Self {
        Self {
            message,
            unresolved: unresolved.into_iter().collect(),
            queued_at: Utc::now(),
        }
    }
}

/// Messages awaiting media resolution. Insertion order is preserved for
/// deterministic tie-breaking; broadcast order is first-fully-resolved.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<PendingEntry>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: PendingEntry) {
        self.entries.push(entry);
    }

    /// Substitutes `url` for every literal occurrence of `key` in each entry
    /// that is still waiting on it, then drains and returns the messages
    /// whose unresolved set became empty. Substitution happens in a first
    /// pass and removal in a second, so entries removed mid-resolve can
    /// never cause another entry to be skipped or visited twice.
    pub fn resolve(&mut self, key: &str, url: &str) -> Vec<ChatMessage> {
        for entry in &mut self.entries {
            if !entry.unresolved.remove(key) {
                continue;
            }
            if let MessageBody::Text { text } = &mut entry.message.body {
                *text = text.replace(key, url);
            }
        }

        let mut ready = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.unresolved.is_empty() {
                ready.push(entry.message);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        ready
    }

    /// Drops entries queued longer than `ttl` ago. Their uploads never
    /// arrived, so the messages will never become broadcastable.
    pub fn evict_older_than(&mut self, ttl: Duration, now: DateTime<Utc>) -> Vec<PendingEntry> {
        let cutoff = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            // A TTL too large to represent never expires anything.
            None => return Vec::new(),
        };
        let mut evicted = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.queued_at < cutoff {
                evicted.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
