//! Error taxonomy for the Eudoxus operators
//!
//! Configuration-time errors (`AlreadyExists`, `NotFound`, `Load`,
//! `InvalidDirective`) abort configuration. Per-transaction errors
//! (`InvalidInput`, `NotImplemented`, `MatchExecution`) fail a single
//! operator evaluation only.

use std::collections::TryReserveError;
use std::path::PathBuf;

use thiserror::Error;

use crate::automaton::FormatError;

/// Eudoxus operator errors
#[derive(Error, Debug)]
pub enum EeError {
    #[error("pattern named \"{0}\" already defined")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("error loading eudoxus automata file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("automata execution error: {0}")]
    MatchExecution(String),

    #[error("allocation failure: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("invalid directive: {0}")]
    InvalidDirective(String),
}

pub type Result<T> = std::result::Result<T, EeError>;
