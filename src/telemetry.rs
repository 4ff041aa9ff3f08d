//! Audit telemetry for the Eudoxus filter
//!
//! In Wasm there is no exporter, so audit events are emitted as one JSON
//! object per log line that Envoy's access logging or an external collector
//! can pick up.

use log::{info, warn};
use serde::Serialize;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A rule with the log action matched
    PatternMatched,
    /// A rule with the block action matched
    RequestBlocked,
    /// An operator failed; treated as no match
    EvaluationFailed,
    /// Streaming cursors of a transaction were released
    TransactionFinished,
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Operator name, `ee` or `ee_match`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Registered automaton name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Captured match text, lossily decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursors_released: Option<usize>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            tx_id: None,
            rule_id: None,
            operator: None,
            pattern: None,
            capture: None,
            reason: None,
            cursors_released: None,
        }
    }

    pub fn with_tx_id(mut self, id: &str) -> Self {
        self.tx_id = Some(id.to_string());
        self
    }

    pub fn with_rule_id(mut self, rule_id: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    pub fn with_rule(mut self, rule_id: &str, operator: &str, pattern: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self.operator = Some(operator.to_string());
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn with_capture(mut self, capture: &[u8]) -> Self {
        self.capture = Some(String::from_utf8_lossy(capture).into_owned());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_cursors_released(mut self, count: usize) -> Self {
        self.cursors_released = Some(count);
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                AuditEventType::RequestBlocked | AuditEventType::EvaluationFailed => {
                    warn!("[EUDOXUS-AUDIT] {}", json);
                }
                _ => {
                    info!("[EUDOXUS-AUDIT] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

/// Audit event for a matched rule; `blocked` selects the event type
pub fn audit_match(
    tx_id: &str,
    rule_id: &str,
    operator: &str,
    pattern: &str,
    capture: Option<&[u8]>,
    blocked: bool,
) -> AuditEvent {
    let event_type = if blocked {
        AuditEventType::RequestBlocked
    } else {
        AuditEventType::PatternMatched
    };
    let event = AuditEvent::new(event_type)
        .with_tx_id(tx_id)
        .with_rule(rule_id, operator, pattern);

    match capture {
        Some(c) => event.with_capture(c),
        None => event,
    }
}

pub fn audit_failed(tx_id: &str, rule_id: &str, reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::EvaluationFailed)
        .with_tx_id(tx_id)
        .with_reason(reason)
        .with_rule_id(rule_id)
}

pub fn audit_finished(tx_id: &str, released: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::TransactionFinished)
        .with_tx_id(tx_id)
        .with_cursors_released(released)
}
