//! Shared alarm data model

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;

pub type AlarmId = String;
pub type RecipientId = String;

/// Comparator applied between the latest sample value and the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparator {
    /// Evaluate the predicate `value <comparator> threshold`
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => (value - threshold).abs() < f64::EPSILON,
            Comparator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    /// Parse the symbol form stored in the registry (">", ">=", ...)
    pub fn parse(symbol: &str) -> Option<Comparator> {
        match symbol {
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Ge),
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Le),
            "==" | "=" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

/// One notification recipient with its channel preference in priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Channels to try, highest priority first
    #[serde(default)]
    pub channel_priority: Vec<ChannelKind>,
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_priority: Vec::new(),
            fcm_token: None,
            telegram_chat_id: None,
        }
    }

    pub fn with_channel(mut self, kind: ChannelKind) -> Self {
        self.channel_priority.push(kind);
        self
    }

    pub fn with_fcm_token(mut self, token: impl Into<String>) -> Self {
        self.fcm_token = Some(token.into());
        self
    }

    pub fn with_telegram_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.telegram_chat_id = Some(chat_id.into());
        self
    }

    /// Endpoint this recipient exposes for a given channel, if any
    pub fn endpoint(&self, kind: ChannelKind) -> Option<&str> {
        match kind {
            ChannelKind::Fcm => self.fcm_token.as_deref(),
            ChannelKind::Telegram => self.telegram_chat_id.as_deref(),
        }
    }
}

/// Alarm definition as stored in the registry.
///
/// Immutable during a single evaluation pass; created and edited by an
/// external management interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: AlarmId,
    pub name: String,
    pub metric_key: String,
    pub comparator: Comparator,
    pub threshold: f64,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    /// Minimum seconds between repeat notifications while in breach
    pub cooldown_secs: u64,
    /// Consecutive clear readings required before leaving ALARMED
    #[serde(default = "default_debounce")]
    pub debounce_cycles: u32,
    pub enabled: bool,
}

fn default_debounce() -> u32 {
    1
}

impl AlarmDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric_key: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metric_key: metric_key.into(),
            comparator,
            threshold,
            recipients: Vec::new(),
            cooldown_secs: 300,
            debounce_cycles: 1,
            enabled: true,
        }
    }

    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_debounce_cycles(mut self, cycles: u32) -> Self {
        self.debounce_cycles = cycles;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Latest reading for one metric, as served by the condition store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSample {
    pub metric_key: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Current status of an alarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    #[default]
    Ok,
    Alarmed,
    Suppressed,
}

/// Per-alarm runtime state, persisted across restarts.
///
/// Owned exclusively by the checker and mutated only by the evaluation step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmState {
    pub status: AlarmStatus,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Consecutive clear readings observed while ALARMED
    #[serde(default)]
    pub clear_streak: u32,
}

/// What kind of transition a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// OK to ALARMED
    Breach,
    /// Still in breach, cooldown elapsed
    Repeat,
    /// ALARMED back to OK
    Resolved,
}

/// One alarm transition handed to the contacter for delivery
#[derive(Debug, Clone, Serialize)]
pub struct AlarmEvent {
    pub kind: EventKind,
    pub alarm_id: AlarmId,
    pub alarm_name: String,
    pub metric_key: String,
    pub value: f64,
    pub threshold: f64,
    pub comparator: Comparator,
    pub at: DateTime<Utc>,
}

impl AlarmEvent {
    pub fn new(
        kind: EventKind,
        definition: &AlarmDefinition,
        sample: &ConditionSample,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            alarm_id: definition.id.clone(),
            alarm_name: definition.name.clone(),
            metric_key: definition.metric_key.clone(),
            value: sample.value,
            threshold: definition.threshold,
            comparator: definition.comparator,
            at,
        }
    }
}

/// Per-recipient outcome of one dispatch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { channel: ChannelKind },
    Failed { detail: String },
    Skipped { reason: String },
}

/// Aggregated outcomes for one alarm event, keyed by recipient id.
///
/// Transient; produced per contacter invocation and logged, never persisted.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub outcomes: HashMap<RecipientId, DispatchOutcome>,
}

impl DispatchResult {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, DispatchOutcome::Delivered { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, DispatchOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, DispatchOutcome::Skipped { .. }))
            .count()
    }
}
