//! Eudoxus pattern-matching operators as an Envoy Wasm filter
//!
//! Compiled Eudoxus automata are loaded at configuration time with
//! `LoadEudoxus <name> <path>` directives. Rules bind the `ee` and
//! `ee_match` operators to the request URI, a request header or the request
//! body. Each HTTP stream is one transaction: the stream form of `ee` keeps
//! its cursor across body chunks, and the cursors are released when the
//! stream is logged.
//!
//! Automata are read from the filesystem at configure time. Envoy's Wasm
//! runtimes do not provide a WASI filesystem, so inside Envoy every
//! `LoadEudoxus` fails with `NotFound` and `on_configure` rejects the
//! configuration. Hosts that grant filesystem access (or embedders using
//! [`EeModule`] directly) load automata normally.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod automaton;
pub mod config;
pub mod error;
pub mod field;
pub mod loader;
pub mod module;
pub mod operator;
pub mod registry;
pub mod rules;
pub mod telemetry;
pub mod tx;

pub use automaton::{Automaton, AutomatonBuilder, BuildMode};
pub use config::{FilterConfig, RuleAction, RuleConfig, RuleTarget};
pub use error::{EeError, Result};
pub use field::{Capture, Field, FieldValue};
pub use module::EeModule;
pub use operator::{OperatorInstance, OperatorKind};
pub use registry::{AutomatonHandle, AutomatonRegistry};
pub use rules::{RuleHit, RuleSet};
pub use tx::Transaction;

use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};

use crate::module::MODULE_NAME;

/// Everything an HTTP context needs, shared read-only across requests
#[derive(Debug, Default)]
pub struct FilterState {
    pub config: FilterConfig,
    pub module: EeModule,
    pub rules: RuleSet,
}

impl FilterState {
    /// Load the automata and build the rules of `config`
    pub fn from_config(config: FilterConfig) -> Result<Self> {
        let config_file = config.config_file.as_deref().map(Path::new);
        let module =
            EeModule::from_directives(config_file, config.directives.iter().map(String::as_str))?;
        let rules = RuleSet::build(&module, &config.rules)?;
        Ok(Self {
            config,
            module,
            rules,
        })
    }
}

/// Root context for filter lifecycle management
struct EudoxusRootContext {
    state: Rc<FilterState>,
}

impl EudoxusRootContext {
    fn new() -> Self {
        Self {
            state: Rc::new(FilterState::default()),
        }
    }
}

impl Context for EudoxusRootContext {}

impl RootContext for EudoxusRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let config = match self.get_plugin_configuration() {
            Some(bytes) => match FilterConfig::from_bytes(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    error!("{}: Invalid plugin configuration: {}", MODULE_NAME, e);
                    return false;
                }
            },
            None => FilterConfig::default(),
        };

        match FilterState::from_config(config) {
            Ok(state) => {
                info!(
                    "{}: Filter initialized with {} automata and {} rules",
                    MODULE_NAME,
                    state.module.registry().len(),
                    state.rules.len()
                );
                self.state = Rc::new(state);
                true
            }
            Err(e) => {
                error!("{}: Configuration failed: {}", MODULE_NAME, e);
                false
            }
        }
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(EudoxusHttpContext::new(
            context_id,
            Rc::clone(&self.state),
        )))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// HTTP context: one transaction per request
struct EudoxusHttpContext {
    context_id: u32,
    state: Rc<FilterState>,
    tx: Transaction,
    /// Bytes of the host's body buffer already inspected
    body_seen: usize,
    /// Buffered body rules skipped because the body grew too large
    body_overflow: bool,
    request_blocked: bool,
}

impl EudoxusHttpContext {
    fn new(context_id: u32, state: Rc<FilterState>) -> Self {
        Self {
            context_id,
            state,
            tx: Transaction::new(context_id.to_string()),
            body_seen: 0,
            body_overflow: false,
            request_blocked: false,
        }
    }

    /// Audit every hit and block on the first block hit
    ///
    /// Returns true if the request was blocked.
    fn handle_hits(&mut self, hits: &[RuleHit]) -> bool {
        for hit in hits {
            hit.audit(self.tx.id(), self.state.config.log_matches).emit();
        }
        match hits.iter().find(|h| h.is_block()) {
            Some(hit) => {
                self.send_block_response(hit);
                true
            }
            None => false,
        }
    }

    /// Send a 403 Forbidden response with JSON error body
    fn send_block_response(&mut self, hit: &RuleHit) {
        if self.request_blocked {
            return;
        }
        self.request_blocked = true;

        let error_body = serde_json::json!({
            "error": "Request Blocked",
            "rule": hit.rule_id,
            "pattern": hit.pattern,
            "status": 403
        });
        let body_bytes = error_body.to_string();

        warn!(
            "[tx={}] BLOCKED by rule {} (pattern \"{}\")",
            self.tx.id(),
            hit.rule_id,
            hit.pattern
        );

        self.send_http_response(
            403,
            vec![
                ("content-type", "application/json"),
                ("x-eudoxus-blocked", "true"),
                ("x-eudoxus-rule", hit.rule_id.as_str()),
            ],
            Some(body_bytes.as_bytes()),
        );
    }

    fn target_field(&self, target: &RuleTarget) -> Option<Field> {
        let name = match target {
            RuleTarget::RequestUri => ":path",
            RuleTarget::RequestHeader { name } => name.as_str(),
            RuleTarget::RequestBody => return None,
        };
        self.get_http_request_header(name)
            .map(|value| Field::nulstr(name, &value))
    }
}

impl Context for EudoxusHttpContext {}

impl HttpContext for EudoxusHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        debug!("[tx={}] Processing request headers", self.tx.id());

        let state = Rc::clone(&self.state);
        let mut hits = Vec::new();
        for rule in state.rules.header_rules() {
            let Some(field) = self.target_field(rule.target()) else {
                debug!(
                    "[tx={}] Rule {} target not present, skipping",
                    self.tx.id(),
                    rule.id()
                );
                continue;
            };
            hits.extend(RuleSet::evaluate([rule], &mut self.tx, &field));
        }

        if self.handle_hits(&hits) {
            return Action::Pause;
        }
        Action::Continue
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.request_blocked {
            return Action::Pause;
        }

        let state = Rc::clone(&self.state);
        let buffering = state.rules.needs_buffered_body() && !self.body_overflow;

        if buffering && body_size > state.config.max_body_size {
            warn!(
                "[tx={}] Body size exceeds maximum ({} bytes), skipping buffered rules",
                self.tx.id(),
                state.config.max_body_size
            );
            // Fail open: the host flushes its buffer once we continue.
            self.body_overflow = true;
        }
        let buffering = buffering && !self.body_overflow;

        let start = self.body_seen.min(body_size);
        let mut hits = Vec::new();
        if start < body_size && state.rules.body_chunk_rules().next().is_some() {
            if let Some(chunk) = self.get_http_request_body(start, body_size - start) {
                debug!(
                    "[tx={}] Inspecting body chunk: {} bytes, end_of_stream: {}",
                    self.tx.id(),
                    chunk.len(),
                    end_of_stream
                );
                let field = Field::bytestr("request_body", &chunk);
                hits.extend(RuleSet::evaluate(
                    state.rules.body_chunk_rules(),
                    &mut self.tx,
                    &field,
                ));
            }
        }
        self.body_seen = if buffering { body_size } else { 0 };

        if self.handle_hits(&hits) {
            return Action::Pause;
        }

        if !buffering {
            return Action::Continue;
        }
        if !end_of_stream {
            // Keep the host buffering until the whole body is here.
            return Action::Pause;
        }

        info!(
            "[tx={}] Analyzing complete body: {} bytes",
            self.tx.id(),
            body_size
        );
        let body = self.get_http_request_body(0, body_size).unwrap_or_default();
        let field = Field::bytestr("request_body", &body);
        let hits = RuleSet::evaluate(state.rules.buffered_body_rules(), &mut self.tx, &field);

        if self.handle_hits(&hits) {
            return Action::Pause;
        }
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        self.set_http_response_header("x-eudoxus-inspected", Some("true"));
        Action::Continue
    }

    fn on_log(&mut self) {
        let released = self.state.module.tx_finished(&mut self.tx);
        telemetry::audit_finished(self.tx.id(), released).emit();

        if self.request_blocked {
            info!("[tx={}] Request was BLOCKED", self.tx.id());
        } else {
            debug!(
                "[tx={}] Request processing complete (context_id={})",
                self.tx.id(),
                self.context_id
            );
        }
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Debug);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(EudoxusRootContext::new())
    });
}}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_automata(dir: &Path) {
        let attack = AutomatonBuilder::new(BuildMode::AhoCorasick)
            .pattern("ignore previous instructions")
            .pattern("jailbreak")
            .build();
        std::fs::write(dir.join("attack.e"), attack.to_bytes()).unwrap();
    }

    fn config_json(dir: &Path, pattern: &str) -> String {
        serde_json::json!({
            "config_file": dir.join("eudoxus.conf").to_string_lossy(),
            "directives": ["LoadEudoxus attack attack.e"],
            "rules": [
                {"id": "body", "operator": "ee", "pattern": pattern, "capture": true},
                {"id": "chunks", "operator": "ee", "pattern": pattern, "stream": true,
                 "action": "log"}
            ]
        })
        .to_string()
    }

    #[test]
    fn test_filter_state_from_config() {
        let dir = tempfile::tempdir().unwrap();
        write_automata(dir.path());

        let config = FilterConfig::from_bytes(config_json(dir.path(), "attack").as_bytes()).unwrap();
        let state = FilterState::from_config(config).unwrap();
        assert_eq!(state.module.registry().len(), 1);
        assert_eq!(state.rules.len(), 2);

        let mut tx = Transaction::new("1");
        let body = Field::bytestr("request_body", b"Please ignore previous instructions now");
        let hits = RuleSet::evaluate(state.rules.buffered_body_rules(), &mut tx, &body);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_block());
        assert_eq!(
            hits[0].capture.as_deref(),
            Some(&b"ignore previous instructions"[..])
        );

        let safe = Field::bytestr("request_body", b"What is the weather like today?");
        assert!(RuleSet::evaluate(state.rules.body_chunk_rules(), &mut tx, &safe).is_empty());
        assert_eq!(state.module.tx_finished(&mut tx), 1);
    }

    #[test]
    fn test_filter_state_rejects_unknown_pattern() {
        let dir = tempfile::tempdir().unwrap();
        write_automata(dir.path());

        let config = FilterConfig::from_bytes(config_json(dir.path(), "missing").as_bytes()).unwrap();
        assert!(matches!(
            FilterState::from_config(config),
            Err(EeError::NotFound(_))
        ));
    }

    #[test]
    fn test_filter_state_rejects_missing_file() {
        let config = FilterConfig {
            directives: vec!["LoadEudoxus attack /nonexistent/attack.e".to_string()],
            ..FilterConfig::default()
        };
        assert!(matches!(
            FilterState::from_config(config),
            Err(EeError::NotFound(_))
        ));
    }
}
