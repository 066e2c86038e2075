//! Telegram Bot API transport

use std::time::Duration;

use reqwest::StatusCode;

use super::{FailureKind, Message, SendError};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Chat-message channel addressed by Telegram chat id
pub struct TelegramChannel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl TelegramChannel {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        }
    }

    /// Point the channel at a different endpoint (tests use a stub server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send one message to one chat
    pub async fn send(&self, chat_id: &str, message: &Message) -> Result<(), SendError> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("{}\n{}", message.title, message.body),
        });

        let url = format!("{}/bot{}/sendMessage", self.base_url, self.api_key);
        let response = match tokio::time::timeout(
            self.timeout,
            self.client.post(url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(SendError::new(FailureKind::Network, e.to_string())),
            Err(_) => {
                return Err(SendError::new(
                    FailureKind::Timeout,
                    format!("no response within {:?}", self.timeout),
                ))
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        let description = body["description"].as_str().unwrap_or("").to_string();

        Err(match status {
            StatusCode::FORBIDDEN => SendError::new(FailureKind::BlockedByUser, description),
            StatusCode::BAD_REQUEST if description.contains("chat not found") => {
                SendError::new(FailureKind::InvalidChat, description)
            }
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => SendError::new(
                FailureKind::Misconfigured,
                "Telegram rejected the bot token",
            ),
            StatusCode::TOO_MANY_REQUESTS => SendError::new(FailureKind::Network, description),
            status if status.is_server_error() => {
                SendError::new(FailureKind::Network, format!("Telegram returned {}", status))
            }
            status => SendError::new(
                FailureKind::Misconfigured,
                format!("Telegram rejected the request with {}: {}", status, description),
            ),
        })
    }
}
