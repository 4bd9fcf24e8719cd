//! Discord adapter (REST).
//!
//! Implements the guild-broadcast DeliveryChannel over the Discord REST API:
//! every notification goes to the first text channel of each guild the bot
//! has joined. Destinations come from the bot's own connection state, never
//! from the registry, so permanent failures here do not evict anything.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use bilmon_core::{
    channel::{ConnectionGauge, DeliveryChannel, DeliveryOutcome},
    domain::{Destination, LinkButton},
    errors::Error,
    Result,
};

const API_BASE: &str = "https://discord.com/api/v10";

/// Channel `type` value for a guild text channel.
const GUILD_TEXT: u8 = 0;

/// Link-style button in a message component row.
const BUTTON_STYLE_LINK: u8 = 5;

pub struct DiscordChannel {
    http: reqwest::Client,
    token: String,
    connection: ConnectionGauge,
}

#[derive(Deserialize)]
struct BotUser {
    username: String,
}

#[derive(Deserialize)]
struct Guild {
    id: String,
}

#[derive(Deserialize)]
struct GuildChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
}

impl DiscordChannel {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            token: token.into(),
            connection: ConnectionGauge::new(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{API_BASE}{path}"))
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    self.connection.report_lost();
                }
                Error::External(format!("discord request error: {e}"))
            })?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "discord returned {} for {path}",
                resp.status()
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::External(format!("discord json error: {e}")))
    }
}

/// Build component rows of link buttons, two per row as the notification has
/// always been laid out.
fn component_rows(links: &[LinkButton]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = links
        .chunks(2)
        .map(|chunk| {
            json!({
                "type": 1,
                "components": chunk
                    .iter()
                    .map(|link| json!({
                        "type": 2,
                        "style": BUTTON_STYLE_LINK,
                        "label": link.label,
                        "url": link.url,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::Value::Array(rows)
}

fn classify_status(status: StatusCode) -> DeliveryOutcome {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            DeliveryOutcome::PermanentFailure(format!("discord returned {status}"))
        }
        _ => DeliveryOutcome::TransientFailure(format!("discord returned {status}")),
    }
}

#[async_trait]
impl DeliveryChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn connection(&self) -> &ConnectionGauge {
        &self.connection
    }

    fn registry_backed(&self) -> bool {
        false
    }

    async fn connect(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{API_BASE}/users/@me"))
            .header(AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(|e| Error::ConnectionLost(format!("discord login failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::ConnectionLost(format!(
                "discord login rejected: {}",
                resp.status()
            )));
        }

        let me: BotUser = resp
            .json()
            .await
            .map_err(|e| Error::ConnectionLost(format!("discord login decode error: {e}")))?;
        info!(username = %me.username, "discord session established");
        Ok(())
    }

    async fn resolve_destinations(&self, _registered: &[Destination]) -> Result<Vec<Destination>> {
        let guilds: Vec<Guild> = self.get_json("/users/@me/guilds").await?;

        let mut destinations = Vec::new();
        for guild in guilds {
            let channels: Vec<GuildChannel> =
                match self.get_json(&format!("/guilds/{}/channels", guild.id)).await {
                    Ok(channels) => channels,
                    Err(e) => {
                        warn!(guild = %guild.id, error = %e, "guild channel listing failed");
                        continue;
                    }
                };

            // First text channel; a send rejection there is classified
            // permanent and the guild is simply skipped that cycle.
            if let Some(channel) = channels.into_iter().find(|c| c.kind == GUILD_TEXT) {
                destinations.push(Destination(channel.id));
            }
        }

        Ok(destinations)
    }

    async fn deliver(
        &self,
        destination: &Destination,
        text: &str,
        links: &[LinkButton],
    ) -> DeliveryOutcome {
        let body = json!({
            "content": text,
            "components": component_rows(links),
        });

        let resp = self
            .http
            .post(format!("{API_BASE}/channels/{destination}/messages"))
            .header(AUTHORIZATION, self.auth())
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => DeliveryOutcome::Success,
            Ok(resp) => classify_status(resp.status()),
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.connection.report_lost();
                }
                DeliveryOutcome::TransientFailure(format!("discord network error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_buttons_are_chunked_two_per_row() {
        let links = vec![
            LinkButton::new("ICPSwap", "https://example.com/a"),
            LinkButton::new("KongSwap", "https://example.com/b"),
            LinkButton::new("Website", "https://example.com/c"),
        ];

        let rows = component_rows(&links);
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["components"].as_array().unwrap().len(), 2);
        assert_eq!(rows[1]["components"].as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["components"][0]["style"], 5);
        assert_eq!(rows[1]["components"][0]["label"], "Website");
    }

    #[test]
    fn forbidden_and_missing_channels_are_permanent() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            DeliveryOutcome::PermanentFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            DeliveryOutcome::PermanentFailure(_)
        ));
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            DeliveryOutcome::TransientFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            DeliveryOutcome::TransientFailure(_)
        ));
    }
}
