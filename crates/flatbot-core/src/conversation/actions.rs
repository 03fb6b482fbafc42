/// Slash commands understood by the bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Repost,
    Find,
    Help,
    Cancel,
}

impl BotCommand {
    /// In the order shown in the Telegram command menu.
    pub const ALL: [BotCommand; 5] = [
        BotCommand::Start,
        BotCommand::Repost,
        BotCommand::Find,
        BotCommand::Help,
        BotCommand::Cancel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Repost => "repost",
            BotCommand::Find => "find",
            BotCommand::Help => "help",
            BotCommand::Cancel => "cancel",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BotCommand::Start => "Главное меню",
            BotCommand::Repost => "Выставить квартиру",
            BotCommand::Find => "Найти квартиру",
            BotCommand::Help => "Помощь по командам",
            BotCommand::Cancel => "Отменить текущее действие",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Split `/cmd@botname args` into a lowercased command name and the rest.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Inline button payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Repost,
    Find,
    ByCost,
    ByCity,
    PriceAbove,
    PriceBelow,
    Confirm,
    BackToStart,
    HelpMain,
    HelpSearch,
    HelpPost,
}

impl CallbackAction {
    const ALL: [CallbackAction; 11] = [
        CallbackAction::Repost,
        CallbackAction::Find,
        CallbackAction::ByCost,
        CallbackAction::ByCity,
        CallbackAction::PriceAbove,
        CallbackAction::PriceBelow,
        CallbackAction::Confirm,
        CallbackAction::BackToStart,
        CallbackAction::HelpMain,
        CallbackAction::HelpSearch,
        CallbackAction::HelpPost,
    ];

    /// Wire value carried in `callback_data` (max 64 bytes on Telegram).
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackAction::Repost => "repost",
            CallbackAction::Find => "find",
            CallbackAction::ByCost => "cost",
            CallbackAction::ByCity => "city",
            CallbackAction::PriceAbove => "more",
            CallbackAction::PriceBelow => "less",
            CallbackAction::Confirm => "ok",
            CallbackAction::BackToStart => "back_to_start",
            CallbackAction::HelpMain => "help_main",
            CallbackAction::HelpSearch => "help_search",
            CallbackAction::HelpPost => "help_post",
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        Self::ALL.into_iter().find(|a| a.as_str() == data)
    }
}
