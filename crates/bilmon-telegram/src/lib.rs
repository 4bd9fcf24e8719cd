//! Telegram adapter (teloxide).
//!
//! Implements the `bilmon-core` DeliveryChannel over the Telegram Bot API
//! and hosts the group-registration router.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
    ApiError, RequestError,
};

use tracing::info;

use bilmon_core::{
    channel::{ConnectionGauge, DeliveryChannel, DeliveryOutcome},
    domain::{Destination, LinkButton},
    errors::Error,
    Result,
};

pub mod router;

pub struct TelegramChannel {
    bot: Bot,
    connection: ConnectionGauge,
}

impl TelegramChannel {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            connection: ConnectionGauge::new(),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn keyboard(links: &[LinkButton]) -> Option<InlineKeyboardMarkup> {
        let mut rows = Vec::new();
        for link in links {
            let Ok(url) = reqwest::Url::parse(&link.url) else {
                continue;
            };
            rows.push(vec![InlineKeyboardButton::url(link.label.clone(), url)]);
        }
        if rows.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup::new(rows))
        }
    }

    /// Map a Telegram send error onto the delivery taxonomy. The
    /// forbidden/blocked class means the bot was removed from the chat and
    /// the destination should be evicted; network-class errors additionally
    /// flag the connection as lost so the supervisor re-establishes it.
    fn classify_send_error(&self, err: RequestError) -> DeliveryOutcome {
        match err {
            RequestError::Api(api) => match api {
                ApiError::BotBlocked
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::ChatNotFound
                | ApiError::GroupDeactivated
                | ApiError::UserDeactivated
                | ApiError::NotEnoughRightsToPostMessages => {
                    DeliveryOutcome::PermanentFailure(format!("telegram: {api}"))
                }
                other => DeliveryOutcome::TransientFailure(format!("telegram api error: {other}")),
            },
            RequestError::RetryAfter(delay) => DeliveryOutcome::TransientFailure(format!(
                "telegram flood control, retry after {}s",
                delay.as_secs()
            )),
            RequestError::Network(e) => {
                self.connection.report_lost();
                DeliveryOutcome::TransientFailure(format!("telegram network error: {e}"))
            }
            RequestError::Io(e) => {
                self.connection.report_lost();
                DeliveryOutcome::TransientFailure(format!("telegram i/o error: {e}"))
            }
            other => DeliveryOutcome::TransientFailure(format!("telegram error: {other}")),
        }
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn connection(&self) -> &ConnectionGauge {
        &self.connection
    }

    fn registry_backed(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| Error::ConnectionLost(format!("telegram login failed: {e}")))?;
        info!(username = me.username(), "telegram session established");
        Ok(())
    }

    async fn resolve_destinations(&self, registered: &[Destination]) -> Result<Vec<Destination>> {
        // Group destinations come straight from the registry snapshot.
        Ok(registered.to_vec())
    }

    async fn deliver(
        &self,
        destination: &Destination,
        text: &str,
        links: &[LinkButton],
    ) -> DeliveryOutcome {
        let Ok(chat_id) = destination.0.parse::<i64>() else {
            // A non-numeric registry row can never be delivered to; let the
            // dispatcher evict it.
            return DeliveryOutcome::PermanentFailure(format!(
                "invalid telegram chat id: {destination}"
            ));
        };

        let mut request = self.bot.send_message(ChatId(chat_id), text.to_string());
        if let Some(markup) = Self::keyboard(links) {
            request = request.reply_markup(markup);
        }

        match request.await {
            Ok(_) => DeliveryOutcome::Success,
            Err(e) => self.classify_send_error(e),
        }
    }
}
