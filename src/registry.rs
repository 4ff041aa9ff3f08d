//! Named automata loaded at configuration time
//!
//! The registry lives as long as the module that owns it. Entries are
//! immutable once inserted and shared read-only between operator instances
//! and concurrent transactions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error};

use crate::automaton::Automaton;
use crate::error::{EeError, Result};
use crate::module::MODULE_NAME;

/// A registered automaton and the name it was registered under
#[derive(Clone, Debug)]
pub struct AutomatonHandle {
    name: Arc<str>,
    automaton: Arc<Automaton>,
}

impl AutomatonHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn automaton(&self) -> &Arc<Automaton> {
        &self.automaton
    }
}

/// Case-insensitive name to automaton table
#[derive(Debug, Default)]
pub struct AutomatonRegistry {
    patterns: HashMap<String, AutomatonHandle>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl AutomatonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the automaton at `path` and register it as `name`
    ///
    /// Fails with `AlreadyExists` before touching the file if the name is
    /// taken. Nothing is registered unless loading succeeds.
    pub fn register(&mut self, name: &str, path: &Path) -> Result<()> {
        self.ensure_vacant(name)?;
        let automaton = Automaton::from_path(path)?;
        self.insert(name, automaton)?;
        debug!(
            "{}: Loaded eudoxus automata \"{}\" from {}",
            MODULE_NAME,
            name,
            path.display()
        );
        Ok(())
    }

    /// Register an already decoded automaton
    pub fn insert(&mut self, name: &str, automaton: Automaton) -> Result<AutomatonHandle> {
        self.ensure_vacant(name)?;
        let handle = AutomatonHandle {
            name: Arc::from(name),
            automaton: Arc::new(automaton),
        };
        self.patterns.insert(key(name), handle.clone());
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Result<AutomatonHandle> {
        self.patterns
            .get(&key(name))
            .cloned()
            .ok_or_else(|| EeError::NotFound(format!("no eudoxus automata named {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(&key(name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            error!("{}: Pattern named \"{}\" already defined", MODULE_NAME, name);
            return Err(EeError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{AutomatonBuilder, BuildMode};

    fn write_automaton(dir: &Path, file: &str, patterns: &[&str]) -> std::path::PathBuf {
        let mut builder = AutomatonBuilder::new(BuildMode::AhoCorasick);
        for p in patterns {
            builder = builder.pattern(p);
        }
        let path = dir.join(file);
        std::fs::write(&path, builder.build().to_bytes()).unwrap();
        path
    }

    #[test]
    fn test_register_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_automaton(dir.path(), "attack.e", &["attack"]);

        let mut registry = AutomatonRegistry::new();
        registry.register("Attack", &path).unwrap();

        let handle = registry.lookup("attack").unwrap();
        assert_eq!(handle.name(), "Attack");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_automaton(dir.path(), "first.e", &["attack"]);
        let second = write_automaton(dir.path(), "second.e", &["other", "words"]);

        let mut registry = AutomatonRegistry::new();
        registry.register("p", &first).unwrap();
        let before = Arc::clone(registry.lookup("p").unwrap().automaton());

        let result = registry.register("P", &second);
        assert!(matches!(result, Err(EeError::AlreadyExists(_))));

        let after = registry.lookup("p").unwrap();
        assert!(Arc::ptr_eq(&before, after.automaton()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_load_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.e");
        std::fs::write(&bad, b"EUDX").unwrap();

        let mut registry = AutomatonRegistry::new();
        assert!(matches!(
            registry.register("bad", &bad),
            Err(EeError::Load { .. })
        ));
        assert!(matches!(
            registry.register("missing", &dir.path().join("nope.e")),
            Err(EeError::NotFound(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = AutomatonRegistry::new();
        assert!(matches!(registry.lookup("x"), Err(EeError::NotFound(_))));
    }
}
