use std::{collections::HashMap, sync::Arc};

use teloxide::{
    dispatching::{dialogue::InMemStorage, Dispatcher},
    dptree,
    prelude::*,
    types::BotCommand as TgBotCommand,
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use flatbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use flatbot_core::{
    config::Config,
    conversation::{BotCommand, Conversation, DialogueState},
    messaging::port::MessagingPort,
    security::RateLimiter,
    store::ListingStore,
    utils::AuditLogger,
};

use crate::handlers;
use crate::TelegramMessenger;

pub type DialogueStorage = InMemStorage<DialogueState>;

#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<Conversation>,
    pub dialogues: Arc<DialogueStorage>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Map size at which locks nobody holds or waits for are dropped.
const PRUNE_LOCKS_AT: usize = 1024;

/// One async mutex per chat, so updates of a chat are applied in order.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() >= PRUNE_LOCKS_AT {
                // Holders and waiters keep a clone of the Arc.
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn command_menu() -> Vec<TgBotCommand> {
    BotCommand::ALL
        .into_iter()
        .map(|c| TgBotCommand::new(c.name(), c.description()))
        .collect()
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<dyn ListingStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.expose());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => anyhow::bail!("telegram rejected the bot token: {e}"),
    }

    if let Err(e) = bot.set_my_commands(command_menu()).await {
        tracing::warn!(error = %e, "failed to publish the command menu");
    }

    // We still keep a 429 RetryAfter retry at the Telegram adapter layer.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let audit = cfg.audit_log_path.as_ref().map(|path| {
        tracing::info!(path = %path.display(), json = cfg.audit_log_json, "audit log enabled");
        AuditLogger::new(path.clone(), cfg.audit_log_json)
    });

    let conversation = Conversation::new(store, messenger)
        .with_rate_limiter(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ))
        .with_audit(audit);

    let state = Arc::new(AppState {
        conversation: Arc::new(conversation),
        dialogues: InMemStorage::<DialogueState>::new(),
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    tracing::info!("polling for updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}
