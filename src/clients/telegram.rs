use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::USER_AGENT;

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: i64,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    description: Option<String>,
}

/// Minimal Bot API client: enough to push HTML messages and cover images.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    pub async fn send_photo(&self, chat_id: i64, photo: &str, caption: &str) -> Result<()> {
        let body = SendPhoto {
            chat_id,
            photo,
            caption,
            parse_mode: "HTML",
        };
        self.call("sendPhoto", &body).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
        };
        self.call("sendMessage", &body).await
    }

    async fn call<B: Serialize + Sync>(&self, method: &str, body: &B) -> Result<()> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;

        let status = response.status();
        let parsed: BotResponse = response
            .json()
            .await
            .with_context(|| format!("Telegram {method} returned an unreadable body"))?;

        if !parsed.ok {
            anyhow::bail!(
                "Telegram {method} rejected (HTTP {}): {}",
                status.as_u16(),
                parsed.description.unwrap_or_default()
            );
        }

        debug!(method, "Telegram call succeeded");
        Ok(())
    }
}
