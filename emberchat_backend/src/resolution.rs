use std::collections::HashMap;

/// Authoritative media key to durable URL state. Purely in-memory, no I/O;
/// callers serialize access through the hub's relay state lock.
#[derive(Debug, Default)]
pub struct MediaResolutionMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl MediaResolutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent overwrite. A key maps to at most one URL at a time, so a
    /// re-put moves the reverse index along with the forward entry.
    pub fn put(&mut self, key: &str, url: &str) {
        if let Some(previous) = self.forward.insert(key.to_string(), url.to_string()) {
            if previous != url {
                self.reverse.remove(&previous);
            }
        }
        self.reverse.insert(url.to_string(), key.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.forward.get(key).map(String::as_str)
    }

    pub fn key_for_url(&self, url: &str) -> Option<&str> {
        self.reverse.get(url).map(String::as_str)
    }

    /// Removes every key currently mapped to exactly `url` and the reverse
    /// entry. Matching is exact string equality on the stored URL value.
    /// Returns the removed keys.
    pub fn invalidate_by_url(&mut self, url: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .forward
            .iter()
            .filter(|(_, stored)| stored.as_str() == url)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            self.forward.remove(key);
        }
        self.reverse.remove(url);
        removed
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
