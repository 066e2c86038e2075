//! Fan-out dispatcher
//!
//! Given one alarm event and a recipient list, tries each recipient's
//! channels in priority order and aggregates per-recipient outcomes. A
//! transient failure falls back to the next channel; there is no retry
//! beyond the fallback list. Scheduled retry is the checker's concern via
//! re-alarm on cooldown expiry.

use std::collections::HashMap;

use crate::channel::{ChannelSet, Message};
use crate::model::{AlarmEvent, DispatchOutcome, DispatchResult, EventKind, Recipient};

/// Seam between the checker and the delivery fan-out
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, event: &AlarmEvent, recipients: &[Recipient]) -> DispatchResult;
}

pub struct Contacter {
    channels: ChannelSet,
}

impl Contacter {
    pub fn new(channels: ChannelSet) -> Self {
        if channels.is_empty() {
            tracing::warn!("no notification channels configured, alarms will only be logged");
        }
        Self { channels }
    }

    async fn dispatch_recipient(&self, recipient: &Recipient, message: &Message) -> DispatchOutcome {
        if recipient.channel_priority.is_empty() {
            return DispatchOutcome::Skipped {
                reason: "no channels configured for recipient".to_string(),
            };
        }

        let mut last_failure = None;
        for kind in &recipient.channel_priority {
            let Some(channel) = self.channels.get(*kind) else {
                tracing::error!(
                    recipient = %recipient.id,
                    channel = %kind,
                    "channel not available (missing credentials), trying next"
                );
                last_failure = Some(format!("{}: misconfigured: channel not available", kind));
                continue;
            };
            let Some(endpoint) = recipient.endpoint(*kind) else {
                tracing::warn!(
                    recipient = %recipient.id,
                    channel = %kind,
                    "recipient has no endpoint for channel, trying next"
                );
                last_failure = Some(format!("{}: no endpoint for recipient", kind));
                continue;
            };

            match channel.send(endpoint, message).await {
                Ok(()) => {
                    tracing::debug!(recipient = %recipient.id, channel = %kind, "delivered");
                    return DispatchOutcome::Delivered { channel: *kind };
                }
                Err(e) if e.kind.is_permanent() => {
                    // Configuration defect, not a transient condition
                    tracing::error!(
                        recipient = %recipient.id,
                        channel = %kind,
                        error = %e,
                        "permanent channel failure"
                    );
                    last_failure = Some(format!("{}: {}", kind, e));
                }
                Err(e) => {
                    tracing::warn!(
                        recipient = %recipient.id,
                        channel = %kind,
                        error = %e,
                        "transient channel failure, falling back to next channel"
                    );
                    last_failure = Some(format!("{}: {}", kind, e));
                }
            }
        }

        DispatchOutcome::Failed {
            detail: last_failure.unwrap_or_else(|| "no usable channel".to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for Contacter {
    /// Per-recipient sends run concurrently; the call resolves only when
    /// every send finished, so the outcome map is logged atomically per
    /// event by the caller.
    async fn dispatch(&self, event: &AlarmEvent, recipients: &[Recipient]) -> DispatchResult {
        let message = render_message(event);

        let sends = recipients.iter().map(|recipient| async {
            let outcome = self.dispatch_recipient(recipient, &message).await;
            (recipient.id.clone(), outcome)
        });

        let outcomes: HashMap<_, _> = futures::future::join_all(sends).await.into_iter().collect();
        DispatchResult { outcomes }
    }
}

fn render_message(event: &AlarmEvent) -> Message {
    let (title, body) = match event.kind {
        EventKind::Breach => (
            format!("Alarm: {}", event.alarm_name),
            format!(
                "{} is {} (threshold {} {})",
                event.metric_key,
                event.value,
                event.comparator.symbol(),
                event.threshold
            ),
        ),
        EventKind::Repeat => (
            format!("Alarm still active: {}", event.alarm_name),
            format!(
                "{} is {}, still past threshold {} {}",
                event.metric_key,
                event.value,
                event.comparator.symbol(),
                event.threshold
            ),
        ),
        EventKind::Resolved => (
            format!("Resolved: {}", event.alarm_name),
            format!("{} is back to {}", event.metric_key, event.value),
        ),
    };

    let data = HashMap::from([
        ("type".to_string(), "alarm".to_string()),
        ("alarm_id".to_string(), event.alarm_id.clone()),
        ("metric_key".to_string(), event.metric_key.clone()),
        ("value".to_string(), event.value.to_string()),
        ("threshold".to_string(), event.threshold.to_string()),
    ]);

    Message { title, body, data }
}
