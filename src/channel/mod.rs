//! Notification transports
//!
//! A closed set of channel variants behind one send contract. The contacter
//! selects channels by data (a recipient's priority list), so adding a
//! provider means adding a variant here, not touching the contacter.

pub mod fcm;
pub mod telegram;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ContacterConfig;

pub use fcm::FcmChannel;
pub use telegram::TelegramChannel;

/// Transport identifier, stored in recipient preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Fcm,
    Telegram,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Fcm => write!(f, "fcm"),
            ChannelKind::Telegram => write!(f, "telegram"),
        }
    }
}

/// Message content for one alarm event
#[derive(Debug, Clone)]
pub struct Message {
    pub title: String,
    pub body: String,
    /// Structured payload delivered alongside the text (alarm id, metric, ...)
    pub data: HashMap<String, String>,
}

/// Why a send failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// FCM rejected the registration token
    InvalidToken,
    /// Provider rate limit hit
    QuotaExceeded,
    /// Telegram recipient blocked the bot
    BlockedByUser,
    /// Telegram chat id does not exist
    InvalidChat,
    /// Bad or missing credentials, a configuration defect
    Misconfigured,
    /// Transport-level failure
    Network,
    /// No response within the per-send timeout
    Timeout,
}

impl FailureKind {
    /// Permanent failures indicate a configuration defect and are not
    /// worth retrying within the same dispatch
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailureKind::InvalidToken
                | FailureKind::BlockedByUser
                | FailureKind::InvalidChat
                | FailureKind::Misconfigured
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidToken => "invalid-token",
            FailureKind::QuotaExceeded => "quota-exceeded",
            FailureKind::BlockedByUser => "blocked-by-user",
            FailureKind::InvalidChat => "invalid-chat",
            FailureKind::Misconfigured => "misconfigured",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct SendError {
    pub kind: FailureKind,
    pub detail: String,
}

impl SendError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// A configured transport
pub enum Channel {
    Fcm(FcmChannel),
    Telegram(TelegramChannel),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Fcm(_) => ChannelKind::Fcm,
            Channel::Telegram(_) => ChannelKind::Telegram,
        }
    }

    /// Send one message to one recipient endpoint (an FCM registration
    /// token or a Telegram chat id, depending on the variant)
    pub async fn send(&self, endpoint: &str, message: &Message) -> Result<(), SendError> {
        match self {
            Channel::Fcm(c) => c.send(endpoint, message).await,
            Channel::Telegram(c) => c.send(endpoint, message).await,
        }
    }
}

/// The transports available to this process
#[derive(Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the channel set from the contacter credentials. Channels
    /// without a key are left out and logged, not constructed half-broken.
    pub fn from_config(config: &ContacterConfig, send_timeout: Duration) -> Self {
        let mut set = Self::new();

        match &config.fcm_api_key {
            Some(key) if !key.is_empty() => {
                set = set.with_channel(Channel::Fcm(FcmChannel::new(key, send_timeout)));
            }
            _ => tracing::warn!("no FCM API key found, disabling FCM notifications"),
        }

        match &config.telegram_api_key {
            Some(key) if !key.is_empty() => {
                set = set.with_channel(Channel::Telegram(TelegramChannel::new(key, send_timeout)));
            }
            _ => tracing::warn!("no Telegram API key found, disabling Telegram notifications"),
        }

        set
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Channel> {
        self.channels.iter().find(|c| c.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(Channel::kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        assert!(FailureKind::InvalidToken.is_permanent());
        assert!(FailureKind::BlockedByUser.is_permanent());
        assert!(FailureKind::InvalidChat.is_permanent());
        assert!(FailureKind::Misconfigured.is_permanent());
        assert!(!FailureKind::Network.is_permanent());
        assert!(!FailureKind::Timeout.is_permanent());
        assert!(!FailureKind::QuotaExceeded.is_permanent());
    }

    #[test]
    fn test_channel_set_from_config() {
        let config = ContacterConfig {
            fcm_api_key: Some("key".to_string()),
            telegram_api_key: None,
        };
        let set = ChannelSet::from_config(&config, Duration::from_secs(5));
        assert_eq!(set.kinds(), vec![ChannelKind::Fcm]);
        assert!(set.get(ChannelKind::Telegram).is_none());

        let empty = ContacterConfig {
            fcm_api_key: Some(String::new()),
            telegram_api_key: None,
        };
        assert!(ChannelSet::from_config(&empty, Duration::from_secs(5)).is_empty());
    }
}
