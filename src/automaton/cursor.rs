//! Incremental automaton execution
//!
//! A cursor is the resumable state of one run of an automaton. Input can be
//! fed in successive spans; outputs reached along the way are delivered to
//! an [`OutputObserver`] which decides whether execution goes on.

use std::sync::Arc;

use super::{Automaton, Step};

/// Observer decision for one delivered output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Keep going
    Continue,
    /// Suspend execution at this output
    Stop,
    /// Abort execution
    Error,
}

/// Result of one execution call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// All input consumed, ready for more
    Ok,
    /// An observer stopped execution at an output
    Stop,
    /// No transition possible, the automaton will not accept more input
    End,
    /// An observer reported an error
    Error,
}

/// Receives every output reached during execution
pub trait OutputObserver {
    fn on_output(&mut self, output: &[u8]) -> Command;
}

impl<F> OutputObserver for F
where
    F: FnMut(&[u8]) -> Command,
{
    fn on_output(&mut self, output: &[u8]) -> Command {
        self(output)
    }
}

/// Resumable execution state over a shared automaton
#[derive(Debug)]
pub struct Cursor {
    automaton: Arc<Automaton>,
    node: u32,
    /// Output index of the current node that stopped execution
    suspended: Option<usize>,
    /// Position in the current input
    offset: usize,
    ended: bool,
    consumed: u64,
}

impl Cursor {
    /// Create a cursor positioned at the automaton start node
    pub fn new(automaton: Arc<Automaton>) -> Self {
        let node = automaton.start();
        Self {
            automaton,
            node,
            suspended: None,
            offset: 0,
            ended: false,
            consumed: 0,
        }
    }

    /// Feed a new span of input
    ///
    /// An output that stopped the previous call is delivered again first.
    /// Bytes of the previous span that were not consumed are dropped.
    pub fn execute(&mut self, input: &[u8], observer: &mut dyn OutputObserver) -> Outcome {
        self.offset = 0;
        self.run(input, observer)
    }

    /// Continue after a `Stop` over the same span passed to the last
    /// [`Cursor::execute`], starting by re-delivering the stopping output.
    pub fn resume(&mut self, input: &[u8], observer: &mut dyn OutputObserver) -> Outcome {
        self.run(input, observer)
    }

    /// Whether the automaton has ended for this cursor
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Total bytes consumed over the cursor lifetime
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    fn run(&mut self, input: &[u8], observer: &mut dyn OutputObserver) -> Outcome {
        if self.ended {
            return Outcome::End;
        }

        let automaton = Arc::clone(&self.automaton);

        if let Some(from) = self.suspended.take() {
            if let Some(outcome) = self.deliver(&automaton, from, observer) {
                return outcome;
            }
        }

        while let Some(&byte) = input.get(self.offset) {
            loop {
                match automaton.step(self.node, byte) {
                    Step::Consume(target) => {
                        self.node = target;
                        break;
                    }
                    Step::Follow(target) => self.node = target,
                    Step::Dead => {
                        self.ended = true;
                        return Outcome::End;
                    }
                }
            }
            self.offset += 1;
            self.consumed += 1;

            if let Some(outcome) = self.deliver(&automaton, 0, observer) {
                return outcome;
            }
        }

        Outcome::Ok
    }

    /// Deliver outputs of the current node starting at `from`
    fn deliver(
        &mut self,
        automaton: &Automaton,
        from: usize,
        observer: &mut dyn OutputObserver,
    ) -> Option<Outcome> {
        let outputs = automaton.node_outputs(self.node);
        for (i, &id) in outputs.iter().enumerate().skip(from) {
            match observer.on_output(automaton.output(id)) {
                Command::Continue => {}
                Command::Stop => {
                    self.suspended = Some(i);
                    return Some(Outcome::Stop);
                }
                Command::Error => return Some(Outcome::Error),
            }
        }
        None
    }
}
