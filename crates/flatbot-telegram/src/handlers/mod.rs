//! Telegram update handlers.
//!
//! Each handler converts a teloxide update into a transport-neutral
//! [`IncomingUpdate`], runs it through the conversation with the chat's stored
//! dialogue state, and stores the state it returns.

use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::Dialogue,
    prelude::*,
    types::{CallbackQuery, Message, User},
};

use flatbot_core::{
    conversation::{actions::parse_command, DialogueState},
    domain::{ChatId as CoreChatId, MessageId, MessageRef, UserId},
    messaging::types::{
        CallbackQuery as CoreCallback, Command, DocumentMessage, IncomingUpdate, PhotoMessage,
        Sender, TextMessage,
    },
};

use crate::router::{AppState, DialogueStorage};

type ChatDialogue = Dialogue<DialogueState, DialogueStorage>;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let update = message_update(&msg);
    run(&state, msg.chat.id, update).await;
    Ok(())
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    // Buttons only exist on messages the bot sent into the chat; fall back to
    // the private chat with the presser when Telegram omits the message.
    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat.id)
        .unwrap_or_else(|| ChatId(user_chat_id(&q.from)));
    let update = callback_update(&q, chat_id);
    run(&state, chat_id, update).await;
    Ok(())
}

async fn run(state: &AppState, chat_id: ChatId, update: IncomingUpdate) {
    let _guard = state.chat_locks.lock_chat(chat_id.0).await;
    let dialogue = ChatDialogue::new(state.dialogues.clone(), chat_id);

    let current = match dialogue.get().await {
        Ok(s) => s.unwrap_or_default(),
        Err(e) => {
            tracing::error!(chat_id = chat_id.0, error = %e, "failed to read dialogue state");
            DialogueState::default()
        }
    };

    let kind = update.kind();
    match state.conversation.handle(current, update).await {
        Ok(next) => {
            if let Err(e) = dialogue.update(next).await {
                tracing::error!(chat_id = chat_id.0, error = %e, "failed to store dialogue state");
            }
        }
        // The previous state stays in storage, so the user can simply retry.
        Err(e) => tracing::error!(chat_id = chat_id.0, update = kind, error = %e, "update failed"),
    }
}

fn user_chat_id(user: &User) -> i64 {
    user.id.0 as i64
}

fn sender(chat_id: ChatId, user: Option<&User>) -> Sender {
    Sender {
        chat_id: CoreChatId(chat_id.0),
        // Channel posts and anonymous admins carry no user; key them by chat.
        user_id: UserId(user.map(user_chat_id).unwrap_or(chat_id.0)),
        username: user.and_then(|u| u.username.clone()),
    }
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat_id: CoreChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
    }
}

fn text_update(from: Sender, message: MessageRef, text: &str) -> IncomingUpdate {
    if text.starts_with('/') {
        let (name, _args) = parse_command(text);
        return IncomingUpdate::Command(Command {
            from,
            message,
            name,
        });
    }
    IncomingUpdate::Text(TextMessage {
        from,
        message,
        text: text.to_string(),
    })
}

fn message_update(msg: &Message) -> IncomingUpdate {
    let from = sender(msg.chat.id, msg.from());
    let message = message_ref(msg);

    if let Some(text) = msg.text() {
        return text_update(from, message, text);
    }

    // Telegram lists photo sizes smallest first.
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        return IncomingUpdate::Photo(PhotoMessage {
            from,
            message,
            file_id: largest.file.id.clone(),
        });
    }

    if let Some(doc) = msg.document() {
        return IncomingUpdate::Document(DocumentMessage {
            from,
            message,
            file_id: doc.file.id.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.to_string()),
        });
    }

    IncomingUpdate::Unsupported(from)
}

fn callback_update(q: &CallbackQuery, chat_id: ChatId) -> IncomingUpdate {
    IncomingUpdate::Callback(CoreCallback {
        from: sender(chat_id, Some(&q.from)),
        callback_id: q.id.clone(),
        data: q.data.clone().unwrap_or_default(),
        message: q.message.as_ref().map(message_ref),
    })
}
