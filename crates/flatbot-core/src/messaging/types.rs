use crate::domain::{ChatId, MessageRef, UserId};

/// Transport-neutral incoming update.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Text(TextMessage),
    Photo(PhotoMessage),
    Document(DocumentMessage),
    Callback(CallbackQuery),
    /// Stickers, voice, locations and anything else the bot does not read.
    Unsupported(Sender),
}

impl IncomingUpdate {
    pub fn sender(&self) -> &Sender {
        match self {
            IncomingUpdate::Command(c) => &c.from,
            IncomingUpdate::Text(t) => &t.from,
            IncomingUpdate::Photo(p) => &p.from,
            IncomingUpdate::Document(d) => &d.from,
            IncomingUpdate::Callback(q) => &q.from,
            IncomingUpdate::Unsupported(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IncomingUpdate::Command(_) => "command",
            IncomingUpdate::Text(_) => "text",
            IncomingUpdate::Photo(_) => "photo",
            IncomingUpdate::Document(_) => "document",
            IncomingUpdate::Callback(_) => "callback",
            IncomingUpdate::Unsupported(_) => "unsupported",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sender {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
}

impl Sender {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("unknown")
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub from: Sender,
    pub message: MessageRef,
    /// Lowercased, without the leading `/` and any `@botname`.
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub from: Sender,
    pub message: MessageRef,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct PhotoMessage {
    pub from: Sender,
    pub message: MessageRef,
    /// File id of the largest size Telegram offered.
    pub file_id: String,
}

#[derive(Clone, Debug)]
pub struct DocumentMessage {
    pub from: Sender,
    pub message: MessageRef,
    pub file_id: String,
    pub mime_type: Option<String>,
}

impl DocumentMessage {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub from: Sender,
    pub callback_id: String,
    pub data: String,
    /// The message carrying the pressed button (absent for very old messages).
    pub message: Option<MessageRef>,
}

/// Outgoing "chat action" shown while search results are uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    UploadPhoto,
}

/// Inline keyboard, one button per row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn callback_data(&self) -> Vec<&str> {
        self.buttons
            .iter()
            .map(|b| b.callback_data.as_str())
            .collect()
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    /// Longest media caption, in characters.
    pub max_caption_len: usize,
}
