//! Configuration-time loading of compiled automata
//!
//! Directive syntax:
//!
//! ```text
//! LoadEudoxus <pattern-name> <file-path>
//! ```
//!
//! Relative paths are resolved against the directory of the configuration
//! file that contains the directive.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::error;

use crate::error::{EeError, Result};
use crate::module::MODULE_NAME;
use crate::registry::AutomatonRegistry;

/// Directive name
pub const LOAD_EUDOXUS: &str = "LoadEudoxus";

/// A parsed configuration directive
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    LoadEudoxus { name: String, path: String },
}

/// Resolve `file` relative to the directory of `config_file`
///
/// Absolute paths, and any path when there is no configuration file, are
/// returned unchanged.
pub fn relative_file(config_file: Option<&Path>, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match config_file.and_then(Path::parent) {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

/// Handle `LoadEudoxus pattern_name filename`
///
/// A taken name fails with `AlreadyExists` before the file is looked at.
/// An unreadable file fails with `NotFound`, an invalid one with `Load`.
pub fn load_eudoxus(
    registry: &mut AutomatonRegistry,
    config_file: Option<&Path>,
    pattern_name: &str,
    filename: &str,
) -> Result<()> {
    if registry.contains(pattern_name) {
        error!(
            "{}: Pattern named \"{}\" already defined",
            MODULE_NAME, pattern_name
        );
        return Err(EeError::AlreadyExists(pattern_name.to_string()));
    }

    let automata_file = relative_file(config_file, filename);

    if let Err(e) = File::open(&automata_file) {
        error!(
            "{}: Error accessing eudoxus automata file: {}.",
            MODULE_NAME,
            automata_file.display()
        );
        return Err(EeError::NotFound(format!(
            "{}: {}",
            automata_file.display(),
            e
        )));
    }

    registry.register(pattern_name, &automata_file)
}

/// Parse one configuration line
///
/// Blank lines and `#` comments yield `None`. Directive names are matched
/// case-insensitively; arguments may be double-quoted.
pub fn parse_directive(line: &str) -> Result<Option<Directive>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = split_words(line)?.into_iter();
    let Some(directive) = words.next() else {
        return Ok(None);
    };

    if !directive.eq_ignore_ascii_case(LOAD_EUDOXUS) {
        return Err(EeError::InvalidDirective(format!(
            "unknown directive {}",
            directive
        )));
    }

    let args: Vec<String> = words.collect();
    match <[String; 2]>::try_from(args) {
        Ok([name, path]) => Ok(Some(Directive::LoadEudoxus { name, path })),
        Err(args) => Err(EeError::InvalidDirective(format!(
            "{} takes 2 parameters, got {}",
            LOAD_EUDOXUS,
            args.len()
        ))),
    }
}

/// Split on whitespace, honouring double quotes and `\"` inside them
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(EeError::InvalidDirective(format!(
            "unterminated quote in: {}",
            line
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{AutomatonBuilder, BuildMode};

    fn write_attack(dir: &Path, file: &str) {
        let automaton = AutomatonBuilder::new(BuildMode::AhoCorasick)
            .pattern("attack")
            .build();
        std::fs::write(dir.join(file), automaton.to_bytes()).unwrap();
    }

    #[test]
    fn test_relative_file() {
        let config = Path::new("/etc/waf/site.conf");
        assert_eq!(
            relative_file(Some(config), "attack.e"),
            PathBuf::from("/etc/waf/attack.e")
        );
        assert_eq!(
            relative_file(Some(config), "/opt/attack.e"),
            PathBuf::from("/opt/attack.e")
        );
        assert_eq!(relative_file(None, "attack.e"), PathBuf::from("attack.e"));
    }

    #[test]
    fn test_load_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        write_attack(dir.path(), "attack.e");
        let config = dir.path().join("site.conf");

        let mut registry = AutomatonRegistry::new();
        load_eudoxus(&mut registry, Some(config.as_path()), "attack", "attack.e").unwrap();
        assert!(registry.contains("ATTACK"));
    }

    #[test]
    fn test_load_duplicate_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        write_attack(dir.path(), "attack.e");
        let config = dir.path().join("site.conf");

        let mut registry = AutomatonRegistry::new();
        load_eudoxus(&mut registry, Some(config.as_path()), "attack", "attack.e").unwrap();

        // The second file does not exist; the name clash is reported anyway.
        let result = load_eudoxus(&mut registry, Some(config.as_path()), "attack", "missing.e");
        assert!(matches!(result, Err(EeError::AlreadyExists(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("site.conf");
        let mut registry = AutomatonRegistry::new();

        let result = load_eudoxus(&mut registry, Some(config.as_path()), "attack", "missing.e");
        assert!(matches!(result, Err(EeError::NotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parse_directive() {
        assert_eq!(parse_directive("  ").unwrap(), None);
        assert_eq!(parse_directive("# comment").unwrap(), None);
        assert_eq!(
            parse_directive("loadeudoxus attack \"rules/attack set.e\"").unwrap(),
            Some(Directive::LoadEudoxus {
                name: "attack".to_string(),
                path: "rules/attack set.e".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_directive_errors() {
        assert!(matches!(
            parse_directive("LoadEudoxus attack"),
            Err(EeError::InvalidDirective(_))
        ));
        assert!(matches!(
            parse_directive("LoadPattern attack a.e"),
            Err(EeError::InvalidDirective(_))
        ));
        assert!(matches!(
            parse_directive("LoadEudoxus attack \"a.e"),
            Err(EeError::InvalidDirective(_))
        ));
    }
}
