//! Per-store change log backing the `/changes` methods.
//!
//! Every committed `/set` (and fixture load) advances one global state
//! counter; each touched object is logged against the new state. A
//! `/changes` call replays the entries after the client's state and folds
//! them into created/updated/destroyed id lists.

use std::collections::BTreeMap;

/// Which object family a log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Mailbox,
    Email,
    Thread,
}

/// What happened to an object at a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Destroyed,
}

#[derive(Debug, Clone)]
struct Entry {
    state: u64,
    object: ObjectType,
    id: String,
    kind: ChangeKind,
}

/// Failure to answer a `/changes` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangesError {
    #[error("unknown state {0:?}")]
    UnknownState(String),
    #[error("more than {max} changes in a single state")]
    TooManyChanges { max: usize },
}

/// The folded result of [`ChangeLog::since`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub old_state: u64,
    pub new_state: u64,
    pub has_more_changes: bool,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub destroyed: Vec<String>,
}

/// Append-only log of object changes with a monotonically increasing state.
#[derive(Debug, Default)]
pub struct ChangeLog {
    state: u64,
    entries: Vec<Entry>,
}

impl ChangeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Opens a new state. Entries recorded afterwards belong to it.
    pub fn advance(&mut self) -> u64 {
        self.state += 1;
        self.state
    }

    /// Logs `kind` for `id` at the current state.
    pub fn record(&mut self, object: ObjectType, id: impl Into<String>, kind: ChangeKind) {
        self.entries.push(Entry {
            state: self.state,
            object,
            id: id.into(),
            kind,
        });
    }

    /// Changes to `object` after `since`, covering at most `max_changes` ids.
    ///
    /// # Errors
    ///
    /// [`ChangesError::UnknownState`] if `since` is not a state this log
    /// issued, [`ChangesError::TooManyChanges`] if a single state touches
    /// more than `max_changes` objects.
    pub fn since(
        &self,
        object: ObjectType,
        since: &str,
        max_changes: Option<usize>,
    ) -> Result<Changes, ChangesError> {
        let old_state = since
            .parse::<u64>()
            .ok()
            .filter(|s| *s <= self.state)
            .ok_or_else(|| ChangesError::UnknownState(since.to_string()))?;

        // id -> (first kind, last kind), in first-seen order.
        let mut order: Vec<String> = Vec::new();
        let mut folded: BTreeMap<String, (ChangeKind, ChangeKind)> = BTreeMap::new();
        let mut new_state = self.state;
        let mut has_more_changes = false;

        let relevant: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.object == object && e.state > old_state)
            .collect();

        let mut idx = 0;
        while idx < relevant.len() {
            let state = relevant[idx].state;
            let group_end = relevant[idx..]
                .iter()
                .position(|e| e.state != state)
                .map_or(relevant.len(), |n| idx + n);
            let group = &relevant[idx..group_end];

            if let Some(max) = max_changes {
                let added = group
                    .iter()
                    .filter(|e| !folded.contains_key(&e.id))
                    .map(|e| e.id.as_str())
                    .collect::<std::collections::BTreeSet<_>>()
                    .len();
                if folded.len() + added > max {
                    if folded.is_empty() {
                        return Err(ChangesError::TooManyChanges { max });
                    }
                    new_state = relevant[idx - 1].state;
                    has_more_changes = true;
                    break;
                }
            }

            for entry in group {
                folded
                    .entry(entry.id.clone())
                    .and_modify(|(_, last)| *last = entry.kind)
                    .or_insert_with(|| {
                        order.push(entry.id.clone());
                        (entry.kind, entry.kind)
                    });
            }
            idx = group_end;
        }

        let mut changes = Changes {
            old_state,
            new_state,
            has_more_changes,
            ..Changes::default()
        };
        for id in order {
            let Some((first, last)) = folded.get(&id) else {
                continue;
            };
            match (first, last) {
                (ChangeKind::Created, ChangeKind::Destroyed) => {}
                (ChangeKind::Created, _) => changes.created.push(id),
                (_, ChangeKind::Destroyed) => changes.destroyed.push(id),
                _ => changes.updated.push(id),
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> ChangeLog {
        let mut log = ChangeLog::new();
        log.advance(); // 1
        log.record(ObjectType::Mailbox, "m1", ChangeKind::Created);
        log.record(ObjectType::Mailbox, "m2", ChangeKind::Created);
        log.record(ObjectType::Email, "e1", ChangeKind::Created);
        log.advance(); // 2
        log.record(ObjectType::Mailbox, "m1", ChangeKind::Updated);
        log.advance(); // 3
        log.record(ObjectType::Mailbox, "m3", ChangeKind::Created);
        log.record(ObjectType::Mailbox, "m2", ChangeKind::Destroyed);
        log.advance(); // 4
        log.record(ObjectType::Mailbox, "m3", ChangeKind::Destroyed);
        log
    }

    #[test]
    fn folds_changes_after_state() {
        let changes = log().since(ObjectType::Mailbox, "1", None).unwrap();
        assert_eq!(changes.old_state, 1);
        assert_eq!(changes.new_state, 4);
        assert!(!changes.has_more_changes);
        assert!(changes.created.is_empty());
        assert_eq!(changes.updated, vec!["m1"]);
        assert_eq!(changes.destroyed, vec!["m2"]);
    }

    #[test]
    fn created_then_updated_stays_created() {
        let changes = log().since(ObjectType::Mailbox, "0", None).unwrap();
        assert_eq!(changes.created, vec!["m1"]);
        assert!(changes.destroyed.is_empty());
    }

    #[test]
    fn filters_by_object_type() {
        let changes = log().since(ObjectType::Email, "0", None).unwrap();
        assert_eq!(changes.created, vec!["e1"]);
        let none = log().since(ObjectType::Email, "1", None).unwrap();
        assert!(none.created.is_empty() && none.updated.is_empty());
        assert_eq!(none.new_state, 4);
    }

    #[test]
    fn max_changes_stops_at_state_boundary() {
        let changes = log().since(ObjectType::Mailbox, "0", Some(2)).unwrap();
        assert!(changes.has_more_changes);
        assert_eq!(changes.new_state, 2);
        assert_eq!(changes.created, vec!["m1", "m2"]);

        let rest = log()
            .since(ObjectType::Mailbox, &changes.new_state.to_string(), Some(2))
            .unwrap();
        assert!(!rest.has_more_changes);
        assert_eq!(rest.destroyed, vec!["m2"]);
    }

    #[test]
    fn single_state_over_limit_is_an_error() {
        let err = log().since(ObjectType::Mailbox, "0", Some(1)).unwrap_err();
        assert_eq!(err, ChangesError::TooManyChanges { max: 1 });
    }

    #[test]
    fn unknown_states_are_rejected() {
        assert!(matches!(
            log().since(ObjectType::Mailbox, "99", None),
            Err(ChangesError::UnknownState(_))
        ));
        assert!(matches!(
            log().since(ObjectType::Mailbox, "abc", None),
            Err(ChangesError::UnknownState(_))
        ));
    }
}
