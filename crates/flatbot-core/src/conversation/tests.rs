use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex as StdMutex,
};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::{
    domain::{ListingId, MessageId, UserId},
    errors::Error,
    messaging::types::{DocumentMessage, MessagingCapabilities, PhotoMessage, TextMessage},
    store::MemoryListingStore,
};

const CHAT: ChatId = ChatId(42);

#[derive(Clone, Debug, PartialEq)]
enum Sent {
    Html(String),
    Keyboard {
        text: String,
        callbacks: Vec<String>,
    },
    Media {
        file_id: String,
        kind: PhotoKind,
        caption: String,
        callbacks: Option<Vec<String>>,
    },
    Edit(MessageRef, String),
    ClearKeyboard(MessageRef),
    Delete(MessageRef),
    Answer(Option<String>),
    Action(ChatAction),
}

#[derive(Default)]
struct FakeMessenger {
    next_id: StdMutex<i32>,
    log: StdMutex<Vec<Sent>>,
    reject_photos: AtomicBool,
    /// Zero means the Telegram default.
    caption_limit: AtomicUsize,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(1000 + *guard),
        }
    }

    fn push(&self, s: Sent) {
        self.log.lock().unwrap().push(s);
    }

    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

fn callbacks(k: &InlineKeyboard) -> Vec<String> {
    k.callback_data().into_iter().map(str::to_string).collect()
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_caption_len: match self.caption_limit.load(Ordering::SeqCst) {
                0 => 1024,
                n => n,
            },
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.push(Sent::Html(html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.push(Sent::Keyboard {
            text: html.to_string(),
            callbacks: callbacks(&keyboard),
        });
        Ok(self.alloc(chat_id))
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        photo: &Photo,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        if photo.kind == PhotoKind::Photo && self.reject_photos.load(Ordering::SeqCst) {
            return Err(Error::External("wrong file identifier".to_string()));
        }
        self.push(Sent::Media {
            file_id: photo.file_id.clone(),
            kind: photo.kind,
            caption: caption.to_string(),
            callbacks: keyboard.as_ref().map(callbacks),
        });
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.push(Sent::Edit(msg, html.to_string()));
        Ok(())
    }

    async fn clear_keyboard(&self, msg: MessageRef) -> Result<()> {
        self.push(Sent::ClearKeyboard(msg));
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.push(Sent::Delete(msg));
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.push(Sent::Action(action));
        Ok(())
    }

    async fn answer_callback_query(&self, _callback_id: &str, text: Option<&str>) -> Result<()> {
        self.push(Sent::Answer(text.map(str::to_string)));
        Ok(())
    }
}

/// Store whose every call fails, as if the database went away.
struct BrokenStore;

#[async_trait]
impl ListingStore for BrokenStore {
    async fn insert(&self, _listing: &NewListing) -> Result<ListingId> {
        Err(Error::Storage("connection refused".to_string()))
    }

    async fn find_price_above(&self, _price: i32) -> Result<Vec<Listing>> {
        Err(Error::Storage("connection refused".to_string()))
    }

    async fn find_price_below(&self, _price: i32) -> Result<Vec<Listing>> {
        Err(Error::Storage("connection refused".to_string()))
    }

    async fn find_by_city(&self, _city: &str) -> Result<Vec<Listing>> {
        Err(Error::Storage("connection refused".to_string()))
    }
}

fn sender() -> Sender {
    Sender {
        chat_id: CHAT,
        user_id: UserId(7),
        username: Some("tenant".to_string()),
    }
}

fn msg(id: i32) -> MessageRef {
    MessageRef {
        chat_id: CHAT,
        message_id: MessageId(id),
    }
}

fn text(s: &str) -> IncomingUpdate {
    IncomingUpdate::Text(TextMessage {
        from: sender(),
        message: msg(1),
        text: s.to_string(),
    })
}

fn command(name: &str) -> IncomingUpdate {
    IncomingUpdate::Command(Command {
        from: sender(),
        message: msg(2),
        name: name.to_string(),
    })
}

fn photo(file_id: &str) -> IncomingUpdate {
    IncomingUpdate::Photo(PhotoMessage {
        from: sender(),
        message: msg(3),
        file_id: file_id.to_string(),
    })
}

fn document(file_id: &str, mime: &str) -> IncomingUpdate {
    IncomingUpdate::Document(DocumentMessage {
        from: sender(),
        message: msg(4),
        file_id: file_id.to_string(),
        mime_type: Some(mime.to_string()),
    })
}

fn button(action: CallbackAction) -> IncomingUpdate {
    IncomingUpdate::Callback(CallbackQuery {
        from: sender(),
        callback_id: "cb".to_string(),
        data: action.as_str().to_string(),
        message: Some(msg(5)),
    })
}

struct Harness {
    conv: Conversation,
    store: Arc<MemoryListingStore>,
    messenger: Arc<FakeMessenger>,
    state: DialogueState,
}

impl Harness {
    fn new() -> Self {
        Self::with_limiter(RateLimiter::disabled())
    }

    fn with_limiter(limiter: RateLimiter) -> Self {
        let store = Arc::new(MemoryListingStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let conv = Conversation::new(store.clone(), messenger.clone()).with_rate_limiter(limiter);
        Self {
            conv,
            store,
            messenger,
            state: DialogueState::Idle,
        }
    }

    async fn send(&mut self, update: IncomingUpdate) {
        let state = std::mem::take(&mut self.state);
        self.state = self.conv.handle(state, update).await.unwrap();
    }

    fn sent(&self) -> Vec<Sent> {
        self.messenger.take()
    }

    /// Walk the flow up to the confirmation preview.
    async fn fill_listing(&mut self, price: &str) {
        self.send(command("repost")).await;
        self.send(text("Москва")).await;
        self.send(text("Тверская 1")).await;
        self.send(text("Двушка у метро")).await;
        self.send(photo("PHOTO_ID")).await;
        self.send(text("@owner")).await;
        self.send(text(price)).await;
    }
}

fn new_listing(city: &str, price: i32) -> NewListing {
    NewListing {
        city: city.to_string(),
        address: "ул. Мира 3".to_string(),
        description: "уютная".to_string(),
        photo: format!("photo-{price}"),
        contacts: "+7 900 000-00-00".to_string(),
        price,
    }
}

#[tokio::test]
async fn posting_flow_prompts_each_field_in_order() {
    let mut h = Harness::new();

    h.send(command("repost")).await;
    assert_eq!(h.state.name(), "posting_city");
    h.send(text("Москва")).await;
    h.send(text("Тверская 1")).await;
    h.send(text("Двушка у метро")).await;
    assert_eq!(h.state.name(), "posting_photo");
    h.send(photo("PHOTO_ID")).await;
    h.send(text("@owner")).await;
    assert_eq!(h.state.name(), "posting_price");

    let sent = h.sent();
    assert_eq!(
        sent,
        vec![
            Sent::Html(texts::step_prompt(ListingStep::City).to_string()),
            Sent::Html(texts::step_prompt(ListingStep::Address).to_string()),
            Sent::Html(texts::step_prompt(ListingStep::Description).to_string()),
            Sent::Html(texts::step_prompt(ListingStep::Photo).to_string()),
            Sent::Html(texts::step_prompt(ListingStep::Contacts).to_string()),
            Sent::Delete(msg(3)),
            Sent::Html(texts::step_prompt(ListingStep::Price).to_string()),
        ]
    );
}

#[tokio::test]
async fn listing_is_stored_only_after_confirmation() {
    let mut h = Harness::new();
    h.fill_listing("25 000").await;

    assert!(matches!(h.state, DialogueState::Confirming { .. }));
    assert!(h.store.is_empty().await);

    let sent = h.sent();
    let Some(Sent::Media {
        file_id,
        kind,
        caption,
        callbacks,
    }) = sent.last()
    else {
        panic!("expected a preview, got {sent:?}");
    };
    assert_eq!(file_id, "PHOTO_ID");
    assert_eq!(*kind, PhotoKind::Photo);
    assert!(caption.contains("Город: Москва"));
    assert!(caption.contains("Цена: 25000 руб."));
    assert!(caption.ends_with("Всё верно?"));
    assert_eq!(
        callbacks.clone().unwrap(),
        vec!["ok".to_string(), "repost".to_string()]
    );

    h.send(button(CallbackAction::Confirm)).await;
    assert_eq!(h.state, DialogueState::Idle);

    let stored = h.store.find_by_city("МОСКВА").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].city, "москва");
    assert_eq!(stored[0].address, "Тверская 1");
    assert_eq!(stored[0].photo, "PHOTO_ID");
    assert_eq!(stored[0].price, 25000);

    assert_eq!(
        h.sent(),
        vec![
            Sent::Answer(None),
            Sent::ClearKeyboard(msg(5)),
            Sent::Keyboard {
                text: texts::LISTING_ADDED.to_string(),
                callbacks: vec!["back_to_start".to_string()],
            },
        ]
    );
}

#[tokio::test]
async fn second_confirm_press_does_not_insert_again() {
    let mut h = Harness::new();
    h.fill_listing("1000").await;
    h.send(button(CallbackAction::Confirm)).await;
    h.sent();

    h.send(button(CallbackAction::Confirm)).await;
    assert_eq!(h.store.len().await, 1);
    assert_eq!(
        h.sent(),
        vec![
            Sent::Answer(Some(texts::STALE_CONFIRM.to_string())),
            Sent::ClearKeyboard(msg(5)),
        ]
    );
}

#[tokio::test]
async fn declining_the_preview_restarts_from_the_city() {
    let mut h = Harness::new();
    h.fill_listing("1000").await;
    h.sent();

    h.send(button(CallbackAction::Repost)).await;
    assert_eq!(h.state, DialogueState::start_posting());
    assert!(h.store.is_empty().await);
    assert_eq!(
        h.sent(),
        vec![
            Sent::Answer(None),
            Sent::ClearKeyboard(msg(5)),
            Sent::Html(texts::step_prompt(ListingStep::City).to_string()),
        ]
    );
}

#[tokio::test]
async fn photo_step_accepts_image_documents_only() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.send(text("Казань")).await;
    h.send(text("Баумана 10")).await;
    h.send(text("Студия")).await;
    h.sent();

    h.send(text("вот фото")).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::SEND_PHOTO.to_string())]);

    h.send(document("PDF", "application/pdf")).await;
    assert_eq!(
        h.sent(),
        vec![
            Sent::Html(texts::SEND_IMAGE_FILE.to_string()),
            Sent::Delete(msg(4)),
        ]
    );
    assert_eq!(h.state.name(), "posting_photo");

    h.send(document("PNG", "image/png")).await;
    assert_eq!(h.state.name(), "posting_contacts");
    let DialogueState::Posting { draft, .. } = &h.state else {
        panic!("still posting");
    };
    assert_eq!(draft.photo, Some(Photo::document("PNG")));
}

#[tokio::test]
async fn document_preview_uses_document_kind() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.send(text("Казань")).await;
    h.send(text("Баумана 10")).await;
    h.send(text("Студия")).await;
    h.send(document("PNG", "image/png")).await;
    h.send(text("@me")).await;
    h.sent();

    h.send(text("20000")).await;
    let sent = h.sent();
    assert!(matches!(
        sent.as_slice(),
        [Sent::Media { kind: PhotoKind::Document, file_id, .. }] if file_id == "PNG"
    ));
}

#[tokio::test]
async fn invalid_price_keeps_the_draft() {
    let mut h = Harness::new();
    h.fill_listing("недорого").await;

    assert_eq!(h.state.name(), "posting_price");
    assert_eq!(
        h.sent().last(),
        Some(&Sent::Html(texts::BAD_PRICE.to_string()))
    );

    h.send(text("30000")).await;
    assert!(matches!(h.state, DialogueState::Confirming { .. }));
}

#[tokio::test]
async fn overlong_and_non_text_answers_are_rejected() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.sent();

    h.send(text(&"а".repeat(51))).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::too_long(50))]);
    assert_eq!(h.state.name(), "posting_city");

    h.send(photo("EARLY")).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::SEND_TEXT.to_string())]);
    assert_eq!(h.state, DialogueState::start_posting());

    h.send(text("   ")).await;
    assert_eq!(h.state.name(), "posting_city");
}

#[tokio::test]
async fn city_search_is_case_insensitive_and_title_cases_results() {
    let mut h = Harness::new();
    h.store.insert(&new_listing("Нижний Новгород", 100)).await.unwrap();
    h.store.insert(&new_listing("Москва", 200)).await.unwrap();

    h.send(button(CallbackAction::ByCity)).await;
    assert_eq!(h.state, DialogueState::SearchingCity);
    h.sent();

    h.send(text("  НИЖНИЙ новгород ")).await;
    assert_eq!(h.state, DialogueState::Idle);

    let sent = h.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], Sent::Action(ChatAction::UploadPhoto));
    let Sent::Media { caption, kind, .. } = &sent[1] else {
        panic!("expected a listing, got {:?}", sent[1]);
    };
    assert_eq!(*kind, PhotoKind::Photo);
    assert!(caption.starts_with("Город: Нижний Новгород\n"));
    assert_eq!(
        sent[2],
        Sent::Keyboard {
            text: texts::NEXT_ACTIONS.to_string(),
            callbacks: vec!["find".to_string(), "back_to_start".to_string()],
        }
    );
}

#[tokio::test]
async fn price_search_uses_strict_bounds() {
    let mut h = Harness::new();
    for p in [100, 200, 300] {
        h.store.insert(&new_listing("Сочи", p)).await.unwrap();
    }

    h.send(button(CallbackAction::ByCost)).await;
    h.send(button(CallbackAction::PriceAbove)).await;
    assert_eq!(
        h.state,
        DialogueState::SearchingPrice(PriceDirection::Above)
    );
    h.sent();

    h.send(text("200")).await;
    let media: Vec<String> = h
        .sent()
        .into_iter()
        .filter_map(|s| match s {
            Sent::Media { file_id, .. } => Some(file_id),
            _ => None,
        })
        .collect();
    assert_eq!(media, vec!["photo-300".to_string()]);

    h.send(button(CallbackAction::PriceBelow)).await;
    h.send(text("abc")).await;
    assert_eq!(
        h.state,
        DialogueState::SearchingPrice(PriceDirection::Below)
    );
    h.send(text("200")).await;
    let media: Vec<String> = h
        .sent()
        .into_iter()
        .filter_map(|s| match s {
            Sent::Media { file_id, .. } => Some(file_id),
            _ => None,
        })
        .collect();
    assert_eq!(media, vec!["photo-100".to_string()]);
}

#[tokio::test]
async fn empty_search_offers_retry_and_home() {
    let mut h = Harness::new();
    h.send(button(CallbackAction::ByCity)).await;
    h.sent();

    h.send(text("Атлантида")).await;
    assert_eq!(
        h.sent(),
        vec![Sent::Keyboard {
            text: texts::NO_RESULTS.to_string(),
            callbacks: vec!["find".to_string(), "back_to_start".to_string()],
        }]
    );
    assert_eq!(h.state, DialogueState::Idle);
}

#[tokio::test]
async fn rejected_photo_is_resent_as_document() {
    let mut h = Harness::new();
    h.store.insert(&new_listing("Омск", 500)).await.unwrap();
    h.messenger.reject_photos.store(true, Ordering::SeqCst);

    h.send(button(CallbackAction::ByCity)).await;
    h.sent();
    h.send(text("омск")).await;

    let sent = h.sent();
    assert!(sent.iter().any(|s| matches!(
        s,
        Sent::Media { kind: PhotoKind::Document, file_id, .. } if file_id == "photo-500"
    )));
}

#[tokio::test]
async fn rate_limited_search_keeps_waiting_for_input() {
    let mut h = Harness::with_limiter(RateLimiter::new(true, 1, Duration::from_secs(60)));
    h.send(button(CallbackAction::ByCity)).await;
    h.send(text("Омск")).await;
    assert_eq!(h.state, DialogueState::Idle);

    h.send(button(CallbackAction::ByCity)).await;
    h.sent();
    h.send(text("Омск")).await;

    assert_eq!(h.state, DialogueState::SearchingCity);
    let sent = h.sent();
    assert!(matches!(sent.as_slice(), [Sent::Html(t)] if t.starts_with("⏳")));
}

#[tokio::test]
async fn store_failure_keeps_the_preview_confirmable() {
    let messenger = Arc::new(FakeMessenger::default());
    let conv = Conversation::new(Arc::new(BrokenStore), messenger.clone());

    let (listing, photo) = {
        let mut draft = ListingDraft::default();
        draft.set_text(ListingStep::City, "Москва".to_string());
        draft.set_text(ListingStep::Address, "Арбат 1".to_string());
        draft.set_text(ListingStep::Description, "вид на реку".to_string());
        draft.photo = Some(Photo::photo("P"));
        draft.set_text(ListingStep::Contacts, "@me".to_string());
        draft.into_listing(90000).unwrap()
    };
    let state = DialogueState::Confirming { listing, photo };

    let next = conv
        .handle(state.clone(), button(CallbackAction::Confirm))
        .await
        .unwrap();
    assert_eq!(next, state);
    assert_eq!(
        messenger.take(),
        vec![Sent::Answer(Some(texts::STORE_UNAVAILABLE.to_string()))]
    );

    let next = conv
        .handle(DialogueState::SearchingCity, text("Москва"))
        .await
        .unwrap();
    assert_eq!(next, DialogueState::SearchingCity);
    assert_eq!(
        messenger.take(),
        vec![Sent::Html(texts::STORE_UNAVAILABLE.to_string())]
    );
}

#[tokio::test]
async fn start_resets_any_flow_and_removes_the_command() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.send(text("Тула")).await;
    h.sent();

    h.send(command("start")).await;
    assert_eq!(h.state, DialogueState::Idle);
    assert_eq!(
        h.sent(),
        vec![
            Sent::Keyboard {
                text: texts::GREETING.to_string(),
                callbacks: vec!["repost".to_string(), "find".to_string()],
            },
            Sent::Delete(msg(2)),
        ]
    );
}

#[tokio::test]
async fn help_sections_edit_the_menu_message() {
    let mut h = Harness::new();
    h.send(command("help")).await;
    h.send(button(CallbackAction::HelpSearch)).await;

    let sent = h.sent();
    assert_eq!(
        sent[0],
        Sent::Keyboard {
            text: texts::HELP_MENU.to_string(),
            callbacks: vec![
                "help_main".to_string(),
                "help_search".to_string(),
                "help_post".to_string(),
            ],
        }
    );
    assert_eq!(sent[1], Sent::Answer(None));
    assert!(matches!(&sent[2], Sent::Edit(m, html) if *m == msg(5) && html.contains("/find")));
}

#[tokio::test]
async fn unknown_command_and_idle_text_get_hints() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.sent();

    h.send(command("weather")).await;
    assert_eq!(h.state, DialogueState::start_posting());
    assert_eq!(
        h.sent(),
        vec![Sent::Html(texts::UNKNOWN_COMMAND.to_string())]
    );

    h.send(command("cancel")).await;
    assert_eq!(h.state, DialogueState::Idle);
    h.sent();

    h.send(text("привет")).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::IDLE_HINT.to_string())]);
}

#[tokio::test]
async fn cancel_leaves_posting_flow() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.send(text("Тула")).await;
    assert_eq!(h.state.name(), "posting_address");
    h.sent();

    h.send(command("cancel")).await;
    assert_eq!(h.state, DialogueState::Idle);
    assert_eq!(h.sent(), vec![Sent::Html(texts::CANCELLED.to_string())]);

    // The next free text is not taken as an address.
    h.send(text("Ленина 5")).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::IDLE_HINT.to_string())]);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn rate_limited_confirm_keeps_preview_and_inserts_nothing() {
    let mut h = Harness::with_limiter(RateLimiter::new(true, 1, Duration::from_secs(60)));
    h.send(button(CallbackAction::ByCity)).await;
    h.send(text("Омск")).await;
    h.fill_listing("40000").await;
    assert_eq!(h.state.name(), "confirming");
    h.sent();

    h.send(button(CallbackAction::Confirm)).await;

    assert_eq!(h.state.name(), "confirming");
    let sent = h.sent();
    assert!(
        matches!(sent.as_slice(), [Sent::Answer(Some(t))] if t.starts_with("⏳")),
        "unexpected replies: {sent:?}"
    );
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn back_to_start_keeps_the_pressed_keyboard() {
    let mut h = Harness::new();
    h.send(button(CallbackAction::BackToStart)).await;

    assert_eq!(h.state, DialogueState::Idle);
    assert_eq!(
        h.sent(),
        vec![
            Sent::Answer(None),
            Sent::Keyboard {
                text: texts::GREETING.to_string(),
                callbacks: vec!["repost".to_string(), "find".to_string()],
            },
        ]
    );
}

#[tokio::test]
async fn city_length_is_checked_after_lowercasing() {
    let mut h = Harness::new();
    h.send(command("repost")).await;
    h.sent();

    // "İ" lowercases to two chars: 30 of them become 60.
    h.send(text(&"İ".repeat(30))).await;
    assert_eq!(h.sent(), vec![Sent::Html(texts::too_long(MAX_CITY_LEN))]);
    assert_eq!(h.state.name(), "posting_city");

    h.send(text(&"İ".repeat(25))).await;
    assert_eq!(h.state.name(), "posting_address");
}

#[tokio::test]
async fn captions_are_cut_to_the_messenger_limit() {
    let mut h = Harness::new();
    h.messenger.caption_limit.store(40, Ordering::SeqCst);
    h.store.insert(&new_listing("Самара", 700)).await.unwrap();

    h.send(button(CallbackAction::ByCity)).await;
    h.sent();
    h.send(text("самара")).await;

    let sent = h.sent();
    let caption = sent
        .iter()
        .find_map(|s| match s {
            Sent::Media { caption, .. } => Some(caption.clone()),
            _ => None,
        })
        .expect("search hit sent as media");
    assert_eq!(caption.chars().count(), 40);
    assert!(caption.starts_with("Город: Самара\n"));
    assert!(caption.ends_with("..."));
}
