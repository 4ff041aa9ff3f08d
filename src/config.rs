//! Configuration module for the Eudoxus filter
//!
//! Configuration is loaded from the Envoy plugin configuration (JSON).
//! Automata themselves are compiled files named by `LoadEudoxus` directive
//! lines; relative paths resolve against `config_file`.

use serde::Deserialize;

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Path of the configuration file the directives came from
    #[serde(default)]
    pub config_file: Option<String>,

    /// Directive lines, e.g. `LoadEudoxus attack attack.e`
    #[serde(default)]
    pub directives: Vec<String>,

    /// Rules binding operators to request data
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Maximum body size buffered for non-stream body rules
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Whether audit events carry the captured match text
    #[serde(default = "default_log_matches")]
    pub log_matches: bool,
}

/// One rule: operator, pattern, target and action
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub id: String,
    /// `ee` or `ee_match`
    pub operator: String,
    /// Name given to the automaton by `LoadEudoxus`
    pub pattern: String,
    #[serde(default)]
    pub target: RuleTarget,
    /// Run the stream form of the operator over each body chunk
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub capture: bool,
    #[serde(default)]
    pub action: RuleAction,
}

/// Request data a rule inspects
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleTarget {
    RequestUri,
    RequestHeader { name: String },
    #[default]
    RequestBody,
}

/// What happens when a rule matches
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Answer 403 and stop the request
    #[default]
    Block,
    /// Emit an audit event only
    Log,
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_log_matches() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            directives: Vec::new(),
            rules: Vec::new(),
            max_body_size: default_max_body_size(),
            log_matches: default_log_matches(),
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str)
            .map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert!(config.directives.is_empty());
        assert!(config.max_body_size > 0);
        assert!(config.log_matches);
    }

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "config_file": "/etc/envoy/eudoxus.conf",
            "directives": ["LoadEudoxus attack attack.e"],
            "rules": [
                {"id": "r1", "operator": "ee", "pattern": "attack", "stream": true},
                {"id": "r2", "operator": "ee_match", "pattern": "methods",
                 "target": {"type": "request_header", "name": ":method"},
                 "capture": true, "action": "log"}
            ],
            "max_body_size": 1024
        }"#;
        let config = FilterConfig::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(config.directives.len(), 1);
        assert_eq!(config.max_body_size, 1024);

        let r1 = &config.rules[0];
        assert_eq!(r1.target, RuleTarget::RequestBody);
        assert_eq!(r1.action, RuleAction::Block);
        assert!(r1.stream);

        let r2 = &config.rules[1];
        assert_eq!(
            r2.target,
            RuleTarget::RequestHeader {
                name: ":method".to_string()
            }
        );
        assert_eq!(r2.action, RuleAction::Log);
        assert!(r2.capture);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            FilterConfig::from_bytes(b"{not json"),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(matches!(
            FilterConfig::from_bytes(&[0xff, 0xfe]),
            Err(ConfigError::InvalidUtf8(_))
        ));
    }
}
