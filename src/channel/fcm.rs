//! FCM push transport (legacy HTTP API)

use std::time::Duration;

use reqwest::StatusCode;

use super::{FailureKind, Message, SendError};

const DEFAULT_BASE_URL: &str = "https://fcm.googleapis.com/fcm";

/// Push channel addressed by FCM registration token, best-effort delivery
pub struct FcmChannel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl FcmChannel {
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

    /// Send a data message to one registration token
    pub async fn send(&self, token: &str, message: &Message) -> Result<(), SendError> {
        let mut data = serde_json::Map::new();
        data.insert("title".to_string(), message.title.clone().into());
        data.insert("body".to_string(), message.body.clone().into());
        for (key, value) in &message.data {
            data.insert(key.clone(), value.clone().into());
        }

        let payload = serde_json::json!({
            "to": token,
            "data": data,
        });

        let request = self
            .client
            .post(format!("{}/send", self.base_url))
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.api_key))
            .json(&payload);

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(SendError::new(FailureKind::Network, e.to_string())),
            Err(_) => {
                return Err(SendError::new(
                    FailureKind::Timeout,
                    format!("no response within {:?}", self.timeout),
                ))
            }
        };

        match response.status() {
            status if status.is_success() => {
                // 200 can still carry a per-token error in the body
                let body: serde_json::Value =
                    response.json().await.unwrap_or(serde_json::Value::Null);
                if body["failure"].as_u64().unwrap_or(0) > 0 {
                    let error = body["results"][0]["error"].as_str().unwrap_or("unknown");
                    return Err(match error {
                        "NotRegistered" | "InvalidRegistration" | "MismatchSenderId" => {
                            SendError::new(FailureKind::InvalidToken, error)
                        }
                        _ => SendError::new(FailureKind::Network, error),
                    });
                }
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SendError::new(
                FailureKind::Misconfigured,
                "FCM rejected the API key",
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(SendError::new(FailureKind::QuotaExceeded, "FCM rate limit"))
            }
            status if status.is_server_error() => Err(SendError::new(
                FailureKind::Network,
                format!("FCM returned {}", status),
            )),
            status => Err(SendError::new(
                FailureKind::Misconfigured,
                format!("FCM rejected the request with {}", status),
            )),
        }
    }
}
