//! Eudoxus operators
//!
//! - `ee`: true at the first match anywhere in the input
//! - `ee_match`: true only if a match covers the whole input
//! - `ee` (stream): `ee` semantics with the cursor kept across calls for the
//!   rest of the transaction
//!
//! All three support capture: the matched text lands in capture item 0.

pub mod engine;

pub use engine::{execute_nonstream, execute_stream};

use std::fmt;

use log::{debug, error};
use uuid::Uuid;

use crate::error::{EeError, Result};
use crate::field::{Capture, Field};
use crate::module::MODULE_NAME;
use crate::registry::{AutomatonHandle, AutomatonRegistry};
use crate::tx::Transaction;

/// Process-unique operator instance id, used only as a map key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator capabilities advertised to the rule engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub capture: bool,
}

/// Which operator a rule uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKind {
    Ee,
    EeMatch,
    EeStream,
}

impl OperatorKind {
    /// Resolve an operator by name and call mode
    pub fn resolve(name: &str, stream: bool) -> Result<Self> {
        match (name, stream) {
            ("ee", false) => Ok(OperatorKind::Ee),
            ("ee", true) => Ok(OperatorKind::EeStream),
            ("ee_match", false) => Ok(OperatorKind::EeMatch),
            (other, true) => Err(EeError::NotFound(format!(
                "no stream operator named {}",
                other
            ))),
            (other, false) => Err(EeError::NotFound(format!("no operator named {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Ee | OperatorKind::EeStream => "ee",
            OperatorKind::EeMatch => "ee_match",
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OperatorKind::EeStream)
    }

    pub fn full_match(&self) -> bool {
        matches!(self, OperatorKind::EeMatch)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { capture: true }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stream() {
            write!(f, "{} (stream)", self.name())
        } else {
            f.write_str(self.name())
        }
    }
}

/// One configured use of an operator, bound to a registered automaton
///
/// Immutable after creation and holds no transaction state.
#[derive(Clone, Debug)]
pub struct OperatorInstance {
    id: InstanceId,
    kind: OperatorKind,
    automaton: AutomatonHandle,
}

impl OperatorInstance {
    /// Bind `kind` to the automaton registered as `pattern_name`
    pub fn create(
        registry: &AutomatonRegistry,
        kind: OperatorKind,
        pattern_name: &str,
    ) -> Result<Self> {
        let automaton = registry.lookup(pattern_name).map_err(|e| {
            error!("{}: No eudoxus automata named {} found.", MODULE_NAME, pattern_name);
            e
        })?;

        let instance = Self {
            id: InstanceId::new(),
            kind,
            automaton,
        };
        debug!(
            "{}: Created {} operator {} for pattern \"{}\"",
            MODULE_NAME,
            kind,
            instance.id,
            instance.automaton.name()
        );
        Ok(instance)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn automaton(&self) -> &AutomatonHandle {
        &self.automaton
    }

    /// Run the operator; `Ok(true)` on a match
    ///
    /// The transaction is only touched by the stream form.
    pub fn execute(
        &self,
        tx: &mut Transaction,
        field: &Field,
        capture: Option<&mut Capture>,
    ) -> Result<bool> {
        match self.kind {
            OperatorKind::EeStream => execute_stream(tx, self, field, capture),
            kind => execute_nonstream(self, field, capture, kind.full_match()),
        }
    }
}
