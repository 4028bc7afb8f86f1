//! Bookkeeping for channel membership, normalized per the wire convention.

use std::collections::HashSet;

/// Strip CR/LF (defense against command injection via a caller-supplied
/// channel name), strip a leading `#`, and lower-case.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim_start_matches('#')
        .to_lowercase()
}

/// The set of channels this client is (or wants to be) joined to.
/// Entries survive disconnection so a reconnect can restore membership.
#[derive(Debug, Default, Clone)]
pub struct ChannelRegistry {
    channels: HashSet<String>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a normalized channel name to the registry. Returns `true` if it
    /// was newly inserted.
    pub fn join(&mut self, name: &str) -> bool {
        self.channels.insert(normalize(name))
    }

    /// Remove a normalized channel name. Idempotent: removing twice is a
    /// no-op both times.
    pub fn part(&mut self, name: &str) -> bool {
        self.channels.remove(&normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains(&normalize(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_hash_and_case() {
        assert_eq!(normalize("#SomeChannel"), "somechannel");
        assert_eq!(normalize("somechannel"), "somechannel");
    }

    #[test]
    fn normalize_strips_crlf() {
        assert_eq!(normalize("#evil\r\nchannel"), "evilchannel");
    }

    #[test]
    fn join_then_contains() {
        let mut reg = ChannelRegistry::new();
        assert!(reg.join("#Foo"));
        assert!(reg.contains("foo"));
        assert!(reg.contains("#Foo"));
    }

    #[test]
    fn join_twice_is_idempotent() {
        let mut reg = ChannelRegistry::new();
        assert!(reg.join("#foo"));
        assert!(!reg.join("#foo"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn part_twice_yields_ok_both_times() {
        let mut reg = ChannelRegistry::new();
        reg.join("#foo");
        assert!(reg.part("#foo"));
        assert!(!reg.part("#foo"));
        assert!(reg.is_empty());
    }

    #[test]
    fn part_without_join_is_noop() {
        let mut reg = ChannelRegistry::new();
        assert!(!reg.part("#never-joined"));
    }
}
