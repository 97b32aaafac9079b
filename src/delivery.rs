use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};

use crate::config::Config;

/// Hands final text to the messaging relay. Delivery failures are logged and
/// reported as `false`; retry and redelivery are the relay's concern, so the
/// rest of the pipeline (session bookkeeping included) still completes.
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> bool;
}

pub struct N8nRelay {
    client: reqwest::Client,
    webhook_url: String,
    api_key: String,
}

impl N8nRelay {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            webhook_url: config.relay_url.clone(),
            api_key: config.relay_api_key.clone(),
        }
    }
}

#[async_trait]
impl OutboundDelivery for N8nRelay {
    async fn send_text(&self, to: &str, text: &str) -> bool {
        if self.webhook_url.trim().is_empty() {
            error!("relay url not configured, dropping outbound message");
            return false;
        }
        let result = self
            .client
            .post(&self.webhook_url)
            .header("x-api-key", &self.api_key)
            .json(&json!({
                "to": to,
                "type": "text",
                "text": text,
            }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(%to, "outbound message delivered");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(%to, %status, body = %body, "relay rejected outbound message");
                false
            }
            Err(err) => {
                error!(%to, error = %err, "relay request failed");
                false
            }
        }
    }
}
