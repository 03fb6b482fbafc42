//! User-facing copy and keyboards.

use crate::messaging::types::{InlineButton, InlineKeyboard};

use super::{
    actions::CallbackAction,
    state::{ListingStep, PriceDirection},
};

pub const GREETING: &str = "Привет! Я бот помогающий тебе найти или выставить арендную квартиру!";
pub const HELP_MENU: &str = "Выберите раздел помощи:";
pub const FIND_MENU: &str = "По какому параметру будем искать квартиру?";
pub const COST_MENU: &str = "Выберите условие отбора квартиры по стоимости";
pub const CITY_SEARCH_PROMPT: &str = "Введите город для поиска";
pub const NO_RESULTS: &str = "Нет квартир, подходящих под ваш запрос";
pub const NEXT_ACTIONS: &str = "Следующие действия";
pub const LISTING_ADDED: &str = "Квартира успешно добавлена!";
pub const CANCELLED: &str = "Действие отменено. Главное меню: /start";
pub const IDLE_HINT: &str = "Чтобы начать, нажмите /start";
pub const UNKNOWN_COMMAND: &str = "Неизвестная команда. Список команд: /help";

pub const SEND_TEXT: &str = "Пожалуйста, отправьте ответ текстом.";
pub const SEND_PHOTO: &str = "Пожалуйста, отправьте фото.";
pub const SEND_IMAGE_FILE: &str = "Пожалуйста, отправьте фото в формате изображения или файла.";
pub const BAD_PRICE: &str = "Введите цену целым числом, например 30000";
pub const CONFIRM_PENDING: &str = "Проверьте объявление и нажмите «Да» или «Нет».";
pub const STALE_CONFIRM: &str = "Объявление уже опубликовано или устарело";
pub const STORE_UNAVAILABLE: &str = "Сервис временно недоступен, попробуйте позже.";
pub const SEARCH_CITY_TEXT: &str = "Введите название города текстом.";

pub fn step_prompt(step: ListingStep) -> &'static str {
    match step {
        ListingStep::City => "Введите город",
        ListingStep::Address => "Введите адрес квартиры",
        ListingStep::Description => "Опишите квартиру",
        ListingStep::Photo => "Прикрепите фото:",
        ListingStep::Contacts => "Оставьте контакты для обратной связи.",
        ListingStep::Price => "Введите цену (в месяц, руб)",
    }
}

pub fn price_prompt(direction: PriceDirection) -> &'static str {
    match direction {
        PriceDirection::Above => "Введите стоимость, от которой следует начать (Больше), руб./мес.",
        PriceDirection::Below => "Введите стоимость, от которой следует начать (Меньше), руб./мес.",
    }
}

pub fn too_long(max: usize) -> String {
    format!("Слишком длинный текст: не больше {max} символов. Попробуйте ещё раз.")
}

pub fn rate_limited(retry_after_secs: f64) -> String {
    format!("⏳ Слишком много запросов. Подождите {retry_after_secs:.0} с.")
}

pub fn help_section(action: CallbackAction) -> Option<&'static str> {
    match action {
        CallbackAction::HelpMain => Some(
            "<b>Основные команды:</b>\n\n\
             <code>/start</code> - Главное меню\n\
             <code>/help</code> - Помощь по командам\n\
             <code>/cancel</code> - Отменить текущее действие",
        ),
        CallbackAction::HelpSearch => Some(
            "<b>Поиск квартир:</b>\n\n\
             <code>/find</code> - Найти квартиру\n\
             Используйте эту команду для поиска арендных квартир",
        ),
        CallbackAction::HelpPost => Some(
            "<b>Размещение объявлений:</b>\n\n\
             <code>/repost</code> - Выставить квартиру\n\
             Используйте эту команду для размещения объявления",
        ),
        _ => None,
    }
}

fn keyboard(buttons: &[(&str, CallbackAction)]) -> InlineKeyboard {
    InlineKeyboard::new(
        buttons
            .iter()
            .map(|(label, action)| InlineButton::new(*label, action.as_str()))
            .collect(),
    )
}

pub fn start_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("Я хочу ВЫСТАВИТЬ арендную квартиру", CallbackAction::Repost),
        ("Я хочу НАЙТИ арендную квартиру", CallbackAction::Find),
    ])
}

pub fn help_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("Основные команды", CallbackAction::HelpMain),
        ("Поиск квартир", CallbackAction::HelpSearch),
        ("Размещение объявлений", CallbackAction::HelpPost),
    ])
}

pub fn find_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("По стоимости", CallbackAction::ByCost),
        ("По городу", CallbackAction::ByCity),
    ])
}

pub fn cost_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("Больше названной стоимости", CallbackAction::PriceAbove),
        ("Меньше названной стоимости", CallbackAction::PriceBelow),
    ])
}

/// "Нет" restarts the listing flow from the city.
pub fn confirm_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("Да", CallbackAction::Confirm),
        ("Нет", CallbackAction::Repost),
    ])
}

pub fn after_search_keyboard() -> InlineKeyboard {
    keyboard(&[
        ("Ещё раз", CallbackAction::Find),
        ("На главную", CallbackAction::BackToStart),
    ])
}

pub fn back_to_start_keyboard() -> InlineKeyboard {
    keyboard(&[("Вернуться в начало", CallbackAction::BackToStart)])
}
