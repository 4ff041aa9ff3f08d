//! Rules binding Eudoxus operators to request data
//!
//! Rules are built once at configuration time; a rule whose operator or
//! pattern cannot be resolved aborts configuration. At request time an
//! operator error fails only its rule, which then counts as no match.

use log::{debug, error, warn};

use crate::config::{RuleAction, RuleConfig, RuleTarget};
use crate::error::Result;
use crate::field::{Capture, Field};
use crate::module::{EeModule, MODULE_NAME};
use crate::operator::OperatorInstance;
use crate::telemetry::{self, AuditEvent};
use crate::tx::Transaction;

/// A configured rule and its operator instance
#[derive(Debug)]
pub struct Rule {
    config: RuleConfig,
    operator: OperatorInstance,
    /// Capture requested and supported by the operator
    capture: bool,
}

/// A rule that matched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleHit {
    pub rule_id: String,
    pub operator: &'static str,
    pub pattern: String,
    pub action: RuleAction,
    /// Capture item 0 when the rule asks for capture
    pub capture: Option<Vec<u8>>,
}

impl RuleHit {
    pub fn is_block(&self) -> bool {
        self.action == RuleAction::Block
    }

    /// Audit event for this hit; the captured text only with `with_capture`
    pub fn audit(&self, tx_id: &str, with_capture: bool) -> AuditEvent {
        let capture = self.capture.as_deref().filter(|_| with_capture);
        telemetry::audit_match(
            tx_id,
            &self.rule_id,
            self.operator,
            &self.pattern,
            capture,
            self.is_block(),
        )
    }
}

impl Rule {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn target(&self) -> &RuleTarget {
        &self.config.target
    }

    pub fn is_stream(&self) -> bool {
        self.config.stream
    }

    pub fn operator(&self) -> &OperatorInstance {
        &self.operator
    }

    pub fn captures(&self) -> bool {
        self.capture
    }

    /// Run the rule's operator over `field`
    pub fn evaluate(&self, tx: &mut Transaction, field: &Field) -> Result<Option<RuleHit>> {
        let mut capture = self.capture.then(Capture::new);
        if !self.operator.execute(tx, field, capture.as_mut())? {
            return Ok(None);
        }

        Ok(Some(RuleHit {
            rule_id: self.config.id.clone(),
            operator: self.operator.kind().name(),
            pattern: self.operator.automaton().name().to_string(),
            action: self.config.action,
            capture: capture.as_ref().and_then(|c| c.get(0)).map(<[u8]>::to_vec),
        }))
    }
}

/// All rules of one filter configuration
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create operator instances for every rule
    pub fn build(module: &EeModule, configs: &[RuleConfig]) -> Result<Self> {
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            let operator = module
                .create_operator(&config.operator, config.stream, &config.pattern)
                .map_err(|e| {
                    error!("{}: Rule {} rejected: {}", MODULE_NAME, config.id, e);
                    e
                })?;
            let capture = config.capture && operator.kind().capabilities().capture;
            if config.capture && !capture {
                warn!(
                    "{}: Rule {} asks for capture but operator {} cannot capture",
                    MODULE_NAME,
                    config.id,
                    operator.kind()
                );
            }
            rules.push(Rule {
                config: config.clone(),
                operator,
                capture,
            });
        }
        debug!("{}: Built {} rules", MODULE_NAME, rules.len());
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that inspect the request URI or a request header
    pub fn header_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| !matches!(r.target(), RuleTarget::RequestBody))
    }

    /// Body rules run on every chunk as it arrives
    pub fn body_chunk_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| matches!(r.target(), RuleTarget::RequestBody) && r.is_stream())
    }

    /// Body rules run once on the complete buffered body
    pub fn buffered_body_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| matches!(r.target(), RuleTarget::RequestBody) && !r.is_stream())
    }

    pub fn needs_buffered_body(&self) -> bool {
        self.buffered_body_rules().next().is_some()
    }

    /// Evaluate `rules` over `field`, collecting hits
    ///
    /// Errors are logged, audited and treated as no match.
    pub fn evaluate<'a>(
        rules: impl IntoIterator<Item = &'a Rule>,
        tx: &mut Transaction,
        field: &Field,
    ) -> Vec<RuleHit> {
        let mut hits = Vec::new();
        for rule in rules {
            match rule.evaluate(tx, field) {
                Ok(Some(hit)) => hits.push(hit),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "[tx={}] Rule {} failed on field \"{}\": {}",
                        tx.id(),
                        rule.id(),
                        field.name,
                        e
                    );
                    telemetry::audit_failed(tx.id(), rule.id(), &e.to_string()).emit();
                }
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{AutomatonBuilder, BuildMode};
    use crate::error::EeError;
    use crate::field::FieldValue;

    fn module() -> EeModule {
        let mut module = EeModule::new();
        module
            .registry_mut()
            .insert(
                "attack",
                AutomatonBuilder::new(BuildMode::AhoCorasick)
                    .pattern("attack")
                    .build(),
            )
            .unwrap();
        module
            .registry_mut()
            .insert(
                "methods",
                AutomatonBuilder::new(BuildMode::Trie)
                    .pattern("GET")
                    .pattern("POST")
                    .build(),
            )
            .unwrap();
        module
    }

    fn rule(id: &str, operator: &str, pattern: &str, target: RuleTarget) -> RuleConfig {
        RuleConfig {
            id: id.to_string(),
            operator: operator.to_string(),
            pattern: pattern.to_string(),
            target,
            stream: false,
            capture: false,
            action: RuleAction::Block,
        }
    }

    #[test]
    fn test_build_partitions_rules() {
        let mut stream = rule("s", "ee", "attack", RuleTarget::RequestBody);
        stream.stream = true;
        let configs = vec![
            rule("uri", "ee", "attack", RuleTarget::RequestUri),
            rule(
                "method",
                "ee_match",
                "methods",
                RuleTarget::RequestHeader {
                    name: ":method".to_string(),
                },
            ),
            rule("body", "ee", "attack", RuleTarget::RequestBody),
            stream,
        ];
        let rules = RuleSet::build(&module(), &configs).unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules.header_rules().count(), 2);
        assert_eq!(rules.body_chunk_rules().map(Rule::id).collect::<Vec<_>>(), ["s"]);
        assert_eq!(rules.buffered_body_rules().map(Rule::id).collect::<Vec<_>>(), ["body"]);
        assert!(rules.needs_buffered_body());
    }

    #[test]
    fn test_build_rejects_unknown_pattern_and_operator() {
        let configs = vec![rule("r", "ee", "missing", RuleTarget::RequestBody)];
        assert!(matches!(
            RuleSet::build(&module(), &configs),
            Err(EeError::NotFound(_))
        ));

        let mut stream_match = rule("r", "ee_match", "attack", RuleTarget::RequestBody);
        stream_match.stream = true;
        assert!(matches!(
            RuleSet::build(&module(), &[stream_match]),
            Err(EeError::NotFound(_))
        ));
    }

    #[test]
    fn test_evaluate_hits_with_capture() {
        let mut config = rule("r1", "ee", "attack", RuleTarget::RequestUri);
        config.capture = true;
        config.action = RuleAction::Log;
        let rules = RuleSet::build(&module(), &[config]).unwrap();
        let mut tx = Transaction::new("tx-1");

        let field = Field::nulstr(":path", "/search?q=attack");
        let hits = RuleSet::evaluate(rules.header_rules(), &mut tx, &field);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, "r1");
        assert_eq!(hits[0].pattern, "attack");
        assert_eq!(hits[0].capture.as_deref(), Some(&b"attack"[..]));
        assert!(!hits[0].is_block());
    }

    #[test]
    fn test_capture_follows_capability() {
        let mut config = rule("c", "ee_match", "methods", RuleTarget::RequestUri);
        config.capture = true;
        let plain = rule("p", "ee", "attack", RuleTarget::RequestUri);
        let rules = RuleSet::build(&module(), &[config, plain]).unwrap();

        let captures: Vec<bool> = rules.header_rules().map(Rule::captures).collect();
        assert_eq!(captures, [true, false]);

        let mut tx = Transaction::new("tx-1");
        let path = Field::nulstr(":path", "POST");
        let hits = RuleSet::evaluate(rules.header_rules(), &mut tx, &path);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].capture.as_deref(), Some(&b"POST"[..]));
    }

    #[test]
    fn test_evaluate_full_match() {
        let configs = vec![rule(
            "m",
            "ee_match",
            "methods",
            RuleTarget::RequestHeader {
                name: ":method".to_string(),
            },
        )];
        let rules = RuleSet::build(&module(), &configs).unwrap();
        let mut tx = Transaction::new("tx-1");

        let get = Field::nulstr(":method", "GET");
        assert_eq!(RuleSet::evaluate(rules.header_rules(), &mut tx, &get).len(), 1);
        let gets = Field::nulstr(":method", "GETS");
        assert!(RuleSet::evaluate(rules.header_rules(), &mut tx, &gets).is_empty());
    }

    #[test]
    fn test_evaluate_error_is_no_match() {
        let rules = RuleSet::build(
            &module(),
            &[rule("r", "ee", "attack", RuleTarget::RequestBody)],
        )
        .unwrap();
        let mut tx = Transaction::new("tx-1");

        let list = Field::new("body", FieldValue::List(Vec::new()));
        assert!(RuleSet::evaluate(rules.buffered_body_rules(), &mut tx, &list).is_empty());
    }

    #[test]
    fn test_stream_rule_across_chunks() {
        let mut config = rule("s", "ee", "attack", RuleTarget::RequestBody);
        config.stream = true;
        let rules = RuleSet::build(&module(), &[config]).unwrap();
        let mut tx = Transaction::new("tx-1");

        let first = Field::bytestr("request_body", b"an att");
        assert!(RuleSet::evaluate(rules.body_chunk_rules(), &mut tx, &first).is_empty());
        let second = Field::bytestr("request_body", b"ack here");
        let hits = RuleSet::evaluate(rules.body_chunk_rules(), &mut tx, &second);
        assert!(hits[0].is_block());
        assert_eq!(tx.release_cursors(), 1);
    }

    #[test]
    fn test_hit_audit_capture_gated() {
        let hit = RuleHit {
            rule_id: "r".to_string(),
            operator: "ee",
            pattern: "attack".to_string(),
            action: RuleAction::Block,
            capture: Some(b"attack".to_vec()),
        };
        assert!(hit.audit("tx", false).capture.is_none());
        assert_eq!(hit.audit("tx", true).capture.as_deref(), Some("attack"));
    }
}
