use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::producer::{StatusEvent, StreamStatus};

/// Last successfully delivered state per subject.
///
/// Lives for the process lifetime and is never persisted. Cloning shares the
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct DeliveryLog {
    inner: Arc<RwLock<HashMap<String, StreamStatus>>>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `(event.subject, event.new_state)` was already delivered.
    pub fn is_delivered(&self, event: &StatusEvent) -> bool {
        let (subject, state) = event.dedup_key();
        self.inner.read().get(subject) == Some(&state)
    }

    pub fn record(&self, event: &StatusEvent) {
        self.inner
            .write()
            .insert(event.subject.clone(), event.new_state);
    }

    pub fn last_state(&self, subject: &str) -> Option<StreamStatus> {
        self.inner.read().get(subject).copied()
    }

    /// All entries sorted by subject.
    pub fn snapshot(&self) -> Vec<(String, StreamStatus)> {
        let mut entries: Vec<_> = self
            .inner
            .read()
            .iter()
            .map(|(subject, state)| (subject.clone(), *state))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detection() {
        let log = DeliveryLog::new();
        let live = StatusEvent::new("ch1", None, StreamStatus::Live);
        assert!(!log.is_delivered(&live));

        log.record(&live);
        assert!(log.is_delivered(&live));

        // Same transition re-emitted with a different previous state.
        let again = StatusEvent::new("ch1", Some(StreamStatus::Offline), StreamStatus::Live);
        assert!(log.is_delivered(&again));

        let ended = StatusEvent::new("ch1", Some(StreamStatus::Live), StreamStatus::Offline);
        assert!(!log.is_delivered(&ended));
    }

    #[test]
    fn test_clones_share_state() {
        let log = DeliveryLog::new();
        let view = log.clone();
        log.record(&StatusEvent::new("b", None, StreamStatus::Offline));
        log.record(&StatusEvent::new("a", None, StreamStatus::Live));

        assert_eq!(view.len(), 2);
        assert_eq!(view.last_state("a"), Some(StreamStatus::Live));
        assert_eq!(
            view.snapshot(),
            vec![
                ("a".to_string(), StreamStatus::Live),
                ("b".to_string(), StreamStatus::Offline)
            ]
        );
    }
}
