//! Per-transaction match state
//!
//! Streaming operators keep one [`MatchCursorState`] per operator instance
//! for the life of a transaction. The states live in a table owned by the
//! [`Transaction`], created on first use and swept when the transaction
//! finishes.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::automaton::{Automaton, Cursor};
use crate::operator::InstanceId;

/// Resumable matching state of one operator instance in one transaction
#[derive(Debug)]
pub struct MatchCursorState {
    pub(crate) cursor: Option<Cursor>,
    /// Length of the last recorded match, 0 when none is pending
    pub(crate) match_len: usize,
    /// The stopping output will be delivered again before any new byte
    pub(crate) match_pending: bool,
    /// Set once the automaton ends; never cleared
    pub(crate) end_of_automaton: bool,
}

impl MatchCursorState {
    pub fn new(automaton: Arc<Automaton>) -> Self {
        Self {
            cursor: Some(Cursor::new(automaton)),
            match_len: 0,
            match_pending: false,
            end_of_automaton: false,
        }
    }

    pub fn is_end_of_automaton(&self) -> bool {
        self.end_of_automaton
    }

    pub fn match_len(&self) -> usize {
        self.match_len
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Release the cursor; returns false if it was already released
    pub fn release(&mut self) -> bool {
        self.cursor.take().is_some()
    }
}

/// Operator instance to cursor state, one per transaction
#[derive(Debug, Default)]
pub struct TxCursorTable {
    states: HashMap<InstanceId, MatchCursorState>,
}

impl TxCursorTable {
    pub fn get(&self, id: &InstanceId) -> Option<&MatchCursorState> {
        self.states.get(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// One request/response processing unit
#[derive(Debug)]
pub struct Transaction {
    id: String,
    cursors: Option<TxCursorTable>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cursors: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The cursor table, if any streaming operator has run
    pub fn cursor_table(&self) -> Option<&TxCursorTable> {
        self.cursors.as_ref()
    }

    /// Look up the state for `id`, creating the table and the state on
    /// first use.
    pub(crate) fn cursor_state(
        &mut self,
        id: InstanceId,
        automaton: &Arc<Automaton>,
    ) -> &mut MatchCursorState {
        let table = self.cursors.get_or_insert_with(TxCursorTable::default);
        table.states.entry(id).or_insert_with(|| {
            debug!("[tx={}] Creating eudoxus cursor for operator {}", self.id, id);
            MatchCursorState::new(Arc::clone(automaton))
        })
    }

    /// Release every cursor of this transaction and drop the table
    ///
    /// A transaction without a table is a no-op, so repeated calls are safe.
    /// Returns the number of cursors released.
    pub fn release_cursors(&mut self) -> usize {
        let Some(mut table) = self.cursors.take() else {
            return 0;
        };

        let released = table
            .states
            .values_mut()
            .map(|state| usize::from(state.release()))
            .sum();

        debug!(
            "[tx={}] Released {} eudoxus cursors ({} operator states)",
            self.id,
            released,
            table.len()
        );
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{AutomatonBuilder, BuildMode};

    fn automaton() -> Arc<Automaton> {
        Arc::new(
            AutomatonBuilder::new(BuildMode::AhoCorasick)
                .pattern("attack")
                .build(),
        )
    }

    #[test]
    fn test_table_created_lazily() {
        let mut tx = Transaction::new("tx-1");
        assert!(tx.cursor_table().is_none());

        let id = InstanceId::new();
        let a = automaton();
        tx.cursor_state(id, &a).match_len = 3;
        tx.cursor_state(id, &a);

        let table = tx.cursor_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&id).unwrap().match_len(), 3);
    }

    #[test]
    fn test_release_cursors() {
        let mut tx = Transaction::new("tx-2");
        let a = automaton();
        tx.cursor_state(InstanceId::new(), &a);
        tx.cursor_state(InstanceId::new(), &a);

        assert_eq!(tx.release_cursors(), 2);
        assert!(tx.cursor_table().is_none());
        // Second notification for the same transaction is a no-op.
        assert_eq!(tx.release_cursors(), 0);
    }

    #[test]
    fn test_release_without_table() {
        let mut tx = Transaction::new("tx-3");
        assert_eq!(tx.release_cursors(), 0);
    }

    #[test]
    fn test_state_release_idempotent() {
        let mut state = MatchCursorState::new(automaton());
        assert!(state.cursor().is_some());
        assert!(state.release());
        assert!(!state.release());
        assert!(state.cursor().is_none());
    }
}
