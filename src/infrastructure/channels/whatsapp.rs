use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::services::send_channel::{SendChannel, SendError};

/// Failure texts that point at the session rather than the one message.
const CHANNEL_ERROR_MARKERS: &[&str] = &[
    "connection closed",
    "not connected",
    "disconnected",
    "session closed",
    "instance not found",
    "qr code",
];

/// Send-text client for a WhatsApp gateway instance; each account maps to
/// one gateway instance addressed by its account id.
pub struct WhatsAppGatewayClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl WhatsAppGatewayClient {
    pub fn new(base_url: String, api_key: String) -> Arc<dyn SendChannel> {
        Arc::new(Self {
            http: Client::builder()
                .user_agent("outbox/whatsapp")
                .build()
                .expect("failed to build whatsapp client"),
            base_url,
            api_key,
        }) as Arc<dyn SendChannel>
    }

    fn build_url(&self, account_id: Uuid) -> String {
        format!("{}/message/sendText/{}", self.base_url, account_id)
    }
}

#[async_trait]
impl SendChannel for WhatsAppGatewayClient {
    async fn send(&self, account_id: Uuid, recipient: &str, body: &str) -> Result<(), SendError> {
        let request = SendTextRequest {
            number: recipient,
            text: body,
        };

        let response = self
            .http
            .post(self.build_url(account_id))
            .header("apikey", &self.api_key)
            .json(&request)
            .send()
            .await
            // Transport failure means nothing reached the channel at all.
            .map_err(|err| SendError::ChannelDown(err.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let detail = match response.json::<GatewayErrorResponse>().await {
            Ok(payload) => payload.detail(),
            Err(_) => "gateway returned an unreadable error".to_string(),
        };
        Err(classify_error(&detail))
    }
}

/// Channel-level failures flip the status gate; everything else is terminal
/// for the one message only.
fn classify_error(detail: &str) -> SendError {
    let lowered = detail.to_lowercase();
    if CHANNEL_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        SendError::ChannelDown(detail.to_string())
    } else {
        SendError::Rejected(detail.to_string())
    }
}

#[derive(Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorResponse {
    error: Option<String>,
    message: Option<serde_json::Value>,
}

impl GatewayErrorResponse {
    fn detail(&self) -> String {
        if let Some(message) = &self.message {
            match message {
                serde_json::Value::String(text) => return text.clone(),
                serde_json::Value::Array(parts) => {
                    let joined: Vec<String> = parts
                        .iter()
                        .filter_map(|part| part.as_str().map(str::to_string))
                        .collect();
                    if !joined.is_empty() {
                        return joined.join("; ");
                    }
                }
                _ => {}
            }
        }
        self.error
            .clone()
            .unwrap_or_else(|| "unknown gateway error".to_string())
    }
}
