//! Engine-scoped Eudoxus operator module
//!
//! Owns the automaton registry for the life of the engine, handles the
//! `LoadEudoxus` directive, creates operator instances and releases
//! streaming cursors when a transaction finishes.

use std::path::Path;

use log::{debug, error, info};

use crate::error::Result;
use crate::loader::{self, Directive};
use crate::operator::{OperatorInstance, OperatorKind};
use crate::registry::AutomatonRegistry;
use crate::tx::Transaction;

/// Module name used as log prefix
pub const MODULE_NAME: &str = "eudoxus_operators";

/// Eudoxus operator module
#[derive(Debug, Default)]
pub struct EeModule {
    registry: AutomatonRegistry,
}

impl EeModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a module from configuration lines
    ///
    /// Any failing line aborts configuration and nothing is returned, so a
    /// half-loaded registry is never used.
    pub fn from_directives<'a>(
        config_file: Option<&Path>,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut module = Self::new();
        for (number, line) in lines.into_iter().enumerate() {
            if let Err(e) = module.apply_directive(config_file, line) {
                error!(
                    "{}: Configuration failed at directive {}: {}",
                    MODULE_NAME,
                    number + 1,
                    e
                );
                return Err(e);
            }
        }
        info!(
            "{}: Loaded {} eudoxus automata",
            MODULE_NAME,
            module.registry.len()
        );
        Ok(module)
    }

    /// Parse and apply one configuration line
    pub fn apply_directive(&mut self, config_file: Option<&Path>, line: &str) -> Result<()> {
        match loader::parse_directive(line)? {
            Some(Directive::LoadEudoxus { name, path }) => {
                self.load_eudoxus(config_file, &name, &path)
            }
            None => Ok(()),
        }
    }

    /// `LoadEudoxus <pattern_name> <filename>`
    pub fn load_eudoxus(
        &mut self,
        config_file: Option<&Path>,
        pattern_name: &str,
        filename: &str,
    ) -> Result<()> {
        loader::load_eudoxus(&mut self.registry, config_file, pattern_name, filename)
    }

    pub fn registry(&self) -> &AutomatonRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AutomatonRegistry {
        &mut self.registry
    }

    /// Create an instance of operator `name` (`ee` or `ee_match`) for
    /// `pattern_name`
    pub fn create_operator(
        &self,
        name: &str,
        stream: bool,
        pattern_name: &str,
    ) -> Result<OperatorInstance> {
        let kind = OperatorKind::resolve(name, stream)?;
        OperatorInstance::create(&self.registry, kind, pattern_name)
    }

    /// Transaction finished hook: release every cursor of `tx`
    pub fn tx_finished(&self, tx: &mut Transaction) -> usize {
        tx.release_cursors()
    }
}

impl Drop for EeModule {
    fn drop(&mut self) {
        debug!(
            "{}: Releasing {} eudoxus automata",
            MODULE_NAME,
            self.registry.len()
        );
    }
}
