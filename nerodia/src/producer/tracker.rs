use std::collections::HashMap;

/// Last known state per subject.
///
/// Feeding it a snapshot yields exactly the subjects whose state changed,
/// including subjects seen for the first time. Subjects missing from a
/// snapshot keep their last state.
#[derive(Debug, Clone)]
pub struct StateTracker<S> {
    last: HashMap<String, S>,
}

impl<S> Default for StateTracker<S> {
    fn default() -> Self {
        Self {
            last: HashMap::new(),
        }
    }
}

impl<S: Clone + PartialEq> StateTracker<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a snapshot, returning `(subject, previous, new)` for every change in
    /// snapshot order.
    pub fn observe<I>(&mut self, snapshot: I) -> Vec<(String, Option<S>, S)>
    where
        I: IntoIterator<Item = (String, S)>,
    {
        let mut changes = Vec::new();
        for (subject, fresh) in snapshot {
            let previous = self.last.get(&subject);
            if previous == Some(&fresh) {
                continue;
            }
            let previous = self.last.insert(subject.clone(), fresh.clone());
            changes.push((subject, previous, fresh));
        }
        changes
    }

    pub fn get(&self, subject: &str) -> Option<&S> {
        self.last.get(subject)
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
