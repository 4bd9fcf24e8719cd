//! Group registration router.
//!
//! Long-polls Telegram updates and persists every group the bot is active in
//! to the destination registry, so the next fan-out cycle reaches it. The
//! registry add is idempotent upstream, which keeps re-registration on
//! ordinary group traffic harmless.

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::UserId};
use tracing::{info, warn};

use bilmon_core::{domain::Destination, ports::RegistryPort};

const GREETING: &str =
    "\u{1F44B} Hello! I am now active in this group and will send periodic updates.";

#[derive(Clone)]
pub struct RouterState {
    pub registry: Arc<dyn RegistryPort>,
    pub bot_id: UserId,
}

/// Run the registration listener until the dispatcher shuts down.
pub async fn run(bot: Bot, registry: Arc<dyn RegistryPort>) {
    let bot_id = match bot.get_me().await {
        Ok(me) => me.id,
        Err(e) => {
            warn!(error = %e, "get_me failed, registration router not started");
            return;
        }
    };

    let state = Arc::new(RouterState { registry, bot_id });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<RouterState>) -> ResponseResult<()> {
    let chat = &msg.chat;
    if !(chat.is_group() || chat.is_supergroup()) {
        return Ok(());
    }

    let destination = Destination(chat.id.0.to_string());
    if let Err(e) = state.registry.add(&destination).await {
        warn!(chat_id = chat.id.0, error = %e, "group registration failed");
    }

    let joined = msg
        .new_chat_members()
        .map(|members| members.iter().any(|m| m.id == state.bot_id))
        .unwrap_or(false);

    if joined {
        info!(
            chat_id = chat.id.0,
            title = chat.title().unwrap_or(""),
            "added to group"
        );
        // Best-effort greeting; delivery failures here are not worth retrying.
        let _ = bot.send_message(chat.id, GREETING).await;
    }

    Ok(())
}
