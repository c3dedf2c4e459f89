//! Ordered record of backend calls
//!
//! Mock backends from different crates share one `CallLog` so a test can
//! assert the relative order of namespace, link, and process operations.

use std::sync::{Arc, Mutex, PoisonError};

/// Shared, append-only list of operation names
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::trace!(entry = %entry, "Recorded call");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of all entries in order
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Position of the first entry starting with `prefix`
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    /// Number of entries starting with `prefix`
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_ordering() {
        let log = CallLog::new();
        let other = log.clone();

        log.record("ns:create");
        other.record("link:reparent");
        log.record("ns:enter target");

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.position("link:"), Some(1));
        assert_eq!(other.count("ns:"), 2);
        assert_eq!(log.position("exec:"), None);
    }
}
