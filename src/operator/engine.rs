//! Match execution shared by the stream and non-stream operators
//!
//! Execution stops at the first match. With full-match policy a match that
//! does not cover the whole input is skipped and the cursor resumed, so a
//! longer match ending later in the same input can still succeed.

use std::sync::Arc;

use log::{debug, error};

use crate::automaton::{Command, Outcome, OutputObserver};
use crate::error::{EeError, Result};
use crate::field::{Capture, Field};
use crate::tx::{MatchCursorState, Transaction};

use super::OperatorInstance;

/// First-match callback state
///
/// Two states: with no pending match the output is recorded (and captured)
/// and execution stops; with a pending match, which is the stopping output
/// being delivered again on resume, the match is dropped and execution
/// continues.
struct FirstMatch<'a> {
    match_len: &'a mut usize,
    pending: &'a mut bool,
    capture: Option<&'a mut Capture>,
}

impl OutputObserver for FirstMatch<'_> {
    fn on_output(&mut self, output: &[u8]) -> Command {
        if *self.pending {
            *self.pending = false;
            *self.match_len = 0;
            return Command::Continue;
        }

        *self.match_len = output.len();

        if let Some(capture) = self.capture.as_deref_mut() {
            capture.clear();
            if let Err(e) = capture.set_item(0, output) {
                error!("Error capturing eudoxus match: {}", e);
                return Command::Error;
            }
        }

        *self.pending = true;
        Command::Stop
    }
}

/// Run the match algorithm over `input` with the cursor held in `state`
fn execute_common(
    state: &mut MatchCursorState,
    input: &[u8],
    full_match: bool,
    capture: Option<&mut Capture>,
) -> Result<bool> {
    let MatchCursorState {
        cursor,
        match_len,
        match_pending,
        end_of_automaton,
    } = state;

    if *end_of_automaton {
        return Ok(false);
    }

    let cursor = cursor
        .as_mut()
        .ok_or_else(|| EeError::MatchExecution("eudoxus cursor already released".to_string()))?;
    let mut observer = FirstMatch {
        match_len,
        pending: match_pending,
        capture,
    };

    let mut outcome = cursor.execute(input, &mut observer);
    loop {
        match outcome {
            Outcome::Stop => {
                if !full_match || *observer.match_len == input.len() {
                    return Ok(true);
                }
                outcome = cursor.resume(input, &mut observer);
            }
            Outcome::End => {
                *end_of_automaton = true;
                return Ok(false);
            }
            Outcome::Ok => return Ok(false),
            Outcome::Error => {
                return Err(EeError::MatchExecution(
                    "eudoxus execution reported an error".to_string(),
                ))
            }
        }
    }
}

/// `ee` / `ee_match`: run once over the whole field with a fresh cursor
///
/// The cursor is dropped before returning, whatever the result.
pub fn execute_nonstream(
    instance: &OperatorInstance,
    field: &Field,
    capture: Option<&mut Capture>,
    full_match: bool,
) -> Result<bool> {
    let input = field.match_input()?;
    let mut state = MatchCursorState::new(Arc::clone(instance.automaton().automaton()));
    execute_common(&mut state, input, full_match, capture)
}

/// `ee` stream form: resume this instance's cursor for the transaction
///
/// The field is validated before any transaction state is created, so a bad
/// field leaves the transaction untouched.
pub fn execute_stream(
    tx: &mut Transaction,
    instance: &OperatorInstance,
    field: &Field,
    capture: Option<&mut Capture>,
) -> Result<bool> {
    let input = field.match_input()?;
    let tx_id = tx.id().to_string();
    let state = tx.cursor_state(instance.id(), instance.automaton().automaton());

    let ended_before = state.is_end_of_automaton();
    let result = execute_common(state, input, false, capture);
    if !ended_before && state.is_end_of_automaton() {
        debug!(
            "[tx={}] Operator {} reached end of automaton \"{}\"",
            tx_id,
            instance.id(),
            instance.automaton().name()
        );
    }
    result
}
