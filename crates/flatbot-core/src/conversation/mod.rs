//! Conversation controller: the per-chat state machine behind listing creation
//! and search.
//!
//! `Conversation::handle` takes the chat's current [`DialogueState`] and one
//! incoming update, performs the replies and store calls, and returns the state
//! to keep for the next update. Storing that state between updates is the
//! transport's job.

pub mod actions;
pub mod state;
pub mod texts;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    domain::{ChatId, MessageRef},
    formatting::escape_html,
    listing::{
        check_len, confirmation_caption, listing_caption, normalize_city, parse_price, Listing,
        NewListing, Photo, PhotoKind, SearchCriteria, MAX_ADDRESS_LEN, MAX_CITY_LEN,
        MAX_CONTACTS_LEN, MAX_DESCRIPTION_LEN, MAX_PHOTO_LEN,
    },
    messaging::{
        port::MessagingPort,
        types::{
            CallbackQuery, ChatAction, Command, IncomingUpdate, InlineKeyboard, Sender,
        },
    },
    security::{RateDecision, RateLimiter},
    store::ListingStore,
    utils::{truncate_text, AuditEvent, AuditLogger},
    Result,
};

pub use actions::{BotCommand, CallbackAction};
pub use state::{DialogueState, ListingDraft, ListingStep, PriceDirection};

pub struct Conversation {
    store: Arc<dyn ListingStore>,
    messenger: Arc<dyn MessagingPort>,
    rate_limiter: Mutex<RateLimiter>,
    audit: Option<AuditLogger>,
}

impl Conversation {
    pub fn new(store: Arc<dyn ListingStore>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            store,
            messenger,
            rate_limiter: Mutex::new(RateLimiter::disabled()),
            audit: None,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Mutex::new(rate_limiter);
        self
    }

    pub fn with_audit(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Advance the chat by one update.
    ///
    /// An `Err` means a reply could not be delivered before anything was
    /// committed; the caller should keep the previous state.
    pub async fn handle(&self, state: DialogueState, update: IncomingUpdate) -> Result<DialogueState> {
        debug!(
            state = state.name(),
            update = update.kind(),
            chat_id = update.sender().chat_id.0,
            "conversation update"
        );

        match update {
            IncomingUpdate::Command(cmd) => self.on_command(state, cmd).await,
            IncomingUpdate::Callback(q) => self.on_callback(state, q).await,
            input => self.on_input(state, input).await,
        }
    }

    // ============== Commands ==============

    async fn on_command(&self, state: DialogueState, cmd: Command) -> Result<DialogueState> {
        let chat_id = cmd.from.chat_id;
        let Some(command) = BotCommand::parse(&cmd.name) else {
            self.messenger
                .send_html(chat_id, texts::UNKNOWN_COMMAND)
                .await?;
            return Ok(state);
        };

        match command {
            BotCommand::Start => {
                self.show_start(chat_id).await?;
                self.delete_quietly(cmd.message).await;
                Ok(DialogueState::Idle)
            }
            BotCommand::Help => {
                self.messenger
                    .send_inline_keyboard(chat_id, texts::HELP_MENU, texts::help_keyboard())
                    .await?;
                Ok(state)
            }
            BotCommand::Repost => self.start_posting(chat_id).await,
            BotCommand::Find => {
                self.show_find_menu(chat_id).await?;
                Ok(DialogueState::Idle)
            }
            BotCommand::Cancel => {
                self.messenger.send_html(chat_id, texts::CANCELLED).await?;
                Ok(DialogueState::Idle)
            }
        }
    }

    // ============== Buttons ==============

    async fn on_callback(&self, state: DialogueState, q: CallbackQuery) -> Result<DialogueState> {
        let chat_id = q.from.chat_id;
        let Some(action) = CallbackAction::parse(&q.data) else {
            debug!(data = %q.data, "unknown callback data");
            self.answer_quietly(&q, None).await;
            return Ok(state);
        };

        match action {
            CallbackAction::Repost => {
                self.answer_quietly(&q, None).await;
                self.clear_keyboard_quietly(q.message).await;
                self.start_posting(chat_id).await
            }
            CallbackAction::Find => {
                self.answer_quietly(&q, None).await;
                self.clear_keyboard_quietly(q.message).await;
                self.show_find_menu(chat_id).await?;
                Ok(DialogueState::Idle)
            }
            CallbackAction::ByCost => {
                self.answer_quietly(&q, None).await;
                self.clear_keyboard_quietly(q.message).await;
                self.messenger
                    .send_inline_keyboard(chat_id, texts::COST_MENU, texts::cost_keyboard())
                    .await?;
                Ok(DialogueState::Idle)
            }
            CallbackAction::ByCity => {
                self.answer_quietly(&q, None).await;
                self.messenger
                    .send_html(chat_id, texts::CITY_SEARCH_PROMPT)
                    .await?;
                Ok(DialogueState::SearchingCity)
            }
            CallbackAction::PriceAbove | CallbackAction::PriceBelow => {
                let direction = if action == CallbackAction::PriceAbove {
                    PriceDirection::Above
                } else {
                    PriceDirection::Below
                };
                self.answer_quietly(&q, None).await;
                self.messenger
                    .send_html(chat_id, texts::price_prompt(direction))
                    .await?;
                Ok(DialogueState::SearchingPrice(direction))
            }
            CallbackAction::Confirm => self.confirm(state, q).await,
            CallbackAction::BackToStart => {
                self.answer_quietly(&q, None).await;
                self.show_start(chat_id).await?;
                Ok(DialogueState::Idle)
            }
            CallbackAction::HelpMain | CallbackAction::HelpSearch | CallbackAction::HelpPost => {
                self.answer_quietly(&q, None).await;
                if let Some(section) = texts::help_section(action) {
                    match q.message {
                        Some(msg) => self.messenger.edit_html(msg, section).await?,
                        None => {
                            self.messenger.send_html(chat_id, section).await?;
                        }
                    }
                }
                Ok(state)
            }
        }
    }

    async fn confirm(&self, state: DialogueState, q: CallbackQuery) -> Result<DialogueState> {
        let (listing, photo) = match state {
            DialogueState::Confirming { listing, photo } => (listing, photo),
            other => {
                // Double tap, or a preview from an earlier session.
                self.answer_quietly(&q, Some(texts::STALE_CONFIRM)).await;
                self.clear_keyboard_quietly(q.message).await;
                return Ok(other);
            }
        };

        if let Some(wait) = self.rate_limited(&q.from).await {
            self.answer_quietly(&q, Some(wait.as_str())).await;
            return Ok(DialogueState::Confirming { listing, photo });
        }

        let id = match self.store.insert(&listing).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, chat_id = q.from.chat_id.0, "failed to store listing");
                self.audit(AuditEvent::error(
                    q.from.user_id.0,
                    q.from.display_name(),
                    &e.to_string(),
                    Some("insert"),
                ));
                self.answer_quietly(&q, Some(texts::STORE_UNAVAILABLE)).await;
                return Ok(DialogueState::Confirming { listing, photo });
            }
        };

        info!(
            listing_id = id.0,
            user_id = q.from.user_id.0,
            price = listing.price,
            "listing published"
        );
        self.audit(AuditEvent::listing_created(
            q.from.user_id.0,
            q.from.display_name(),
            id.0,
            &summarize(&listing),
        ));

        // The row is committed from here on: delivery failures are only logged so
        // the caller does not keep `Confirming` and allow a second insert.
        self.answer_quietly(&q, None).await;
        self.clear_keyboard_quietly(q.message).await;
        if let Err(e) = self
            .messenger
            .send_inline_keyboard(
                q.from.chat_id,
                texts::LISTING_ADDED,
                texts::back_to_start_keyboard(),
            )
            .await
        {
            warn!(error = %e, "failed to confirm publication to user");
        }

        Ok(DialogueState::Idle)
    }

    // ============== Free input ==============

    async fn on_input(&self, state: DialogueState, input: IncomingUpdate) -> Result<DialogueState> {
        let chat_id = input.sender().chat_id;
        match state {
            DialogueState::Idle => {
                self.messenger.send_html(chat_id, texts::IDLE_HINT).await?;
                Ok(DialogueState::Idle)
            }
            DialogueState::Posting { step, draft } => self.on_posting(step, draft, input).await,
            DialogueState::Confirming { .. } => {
                self.messenger
                    .send_html(chat_id, texts::CONFIRM_PENDING)
                    .await?;
                Ok(state)
            }
            DialogueState::SearchingCity => {
                let IncomingUpdate::Text(t) = input else {
                    self.messenger
                        .send_html(chat_id, texts::SEARCH_CITY_TEXT)
                        .await?;
                    return Ok(state);
                };
                let city = t.text.trim();
                if city.is_empty() {
                    self.messenger
                        .send_html(chat_id, texts::SEARCH_CITY_TEXT)
                        .await?;
                    return Ok(state);
                }
                self.search(&t.from, SearchCriteria::City(city.to_string()), state)
                    .await
            }
            DialogueState::SearchingPrice(direction) => {
                let IncomingUpdate::Text(t) = input else {
                    self.messenger.send_html(chat_id, texts::BAD_PRICE).await?;
                    return Ok(state);
                };
                match parse_price(&t.text) {
                    Ok(price) => {
                        self.search(&t.from, SearchCriteria::Price(direction.bound(price)), state)
                            .await
                    }
                    Err(_) => {
                        self.messenger.send_html(chat_id, texts::BAD_PRICE).await?;
                        Ok(state)
                    }
                }
            }
        }
    }

    async fn on_posting(
        &self,
        step: ListingStep,
        mut draft: ListingDraft,
        input: IncomingUpdate,
    ) -> Result<DialogueState> {
        let chat_id = input.sender().chat_id;
        let stay = |draft: ListingDraft| DialogueState::Posting { step, draft };

        match step {
            ListingStep::Photo => {
                let (photo, message) = match input {
                    IncomingUpdate::Photo(p) => (Photo::photo(p.file_id), p.message),
                    IncomingUpdate::Document(d) if d.is_image() => {
                        (Photo::document(d.file_id), d.message)
                    }
                    IncomingUpdate::Document(d) => {
                        self.messenger
                            .send_html(chat_id, texts::SEND_IMAGE_FILE)
                            .await?;
                        self.delete_quietly(d.message).await;
                        return Ok(stay(draft));
                    }
                    _ => {
                        self.messenger.send_html(chat_id, texts::SEND_PHOTO).await?;
                        return Ok(stay(draft));
                    }
                };

                if check_len("photo", &photo.file_id, MAX_PHOTO_LEN).is_err() {
                    self.messenger
                        .send_html(chat_id, texts::SEND_IMAGE_FILE)
                        .await?;
                    return Ok(stay(draft));
                }

                debug!(kind = ?photo.kind, "listing photo received");
                draft.photo = Some(photo);
                let next = ListingStep::Contacts;
                self.messenger
                    .send_html(chat_id, texts::step_prompt(next))
                    .await?;
                self.delete_quietly(message).await;
                Ok(DialogueState::Posting { step: next, draft })
            }
            ListingStep::Price => {
                let IncomingUpdate::Text(t) = input else {
                    self.messenger.send_html(chat_id, texts::BAD_PRICE).await?;
                    return Ok(stay(draft));
                };
                let Ok(price) = parse_price(&t.text) else {
                    self.messenger.send_html(chat_id, texts::BAD_PRICE).await?;
                    return Ok(stay(draft));
                };
                let Some((listing, photo)) = draft.into_listing(price) else {
                    warn!(chat_id = chat_id.0, "incomplete draft at price step, restarting");
                    return self.start_posting(chat_id).await;
                };

                self.send_preview(chat_id, &listing, &photo).await?;
                Ok(DialogueState::Confirming { listing, photo })
            }
            text_step => {
                let IncomingUpdate::Text(t) = input else {
                    self.messenger.send_html(chat_id, texts::SEND_TEXT).await?;
                    return Ok(stay(draft));
                };
                let value = t.text.trim();
                if value.is_empty() {
                    self.messenger
                        .send_html(chat_id, texts::step_prompt(text_step))
                        .await?;
                    return Ok(stay(draft));
                }
                let max = max_len(text_step);
                // Cities are stored lowercased, which can lengthen them ("İ").
                let stored_len_ok = if text_step == ListingStep::City {
                    check_len(text_step.name(), &normalize_city(value), max).is_ok()
                } else {
                    check_len(text_step.name(), value, max).is_ok()
                };
                if !stored_len_ok {
                    self.messenger
                        .send_html(chat_id, &texts::too_long(max))
                        .await?;
                    return Ok(stay(draft));
                }

                draft.set_text(text_step, value.to_string());
                let next = text_step.next().unwrap_or(ListingStep::Price);
                self.messenger
                    .send_html(chat_id, texts::step_prompt(next))
                    .await?;
                Ok(DialogueState::Posting { step: next, draft })
            }
        }
    }

    // ============== Search ==============

    async fn search(
        &self,
        from: &Sender,
        criteria: SearchCriteria,
        state: DialogueState,
    ) -> Result<DialogueState> {
        let chat_id = from.chat_id;
        if let Some(wait) = self.rate_limited(from).await {
            self.messenger.send_html(chat_id, &wait).await?;
            return Ok(state);
        }

        let hits = match self.store.search(&criteria).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, criteria = %criteria.describe(), "search failed");
                self.audit(AuditEvent::error(
                    from.user_id.0,
                    from.display_name(),
                    &e.to_string(),
                    Some("search"),
                ));
                self.messenger
                    .send_html(chat_id, texts::STORE_UNAVAILABLE)
                    .await?;
                return Ok(state);
            }
        };

        info!(criteria = %criteria.describe(), results = hits.len(), "search");
        self.audit(AuditEvent::search(
            from.user_id.0,
            from.display_name(),
            &criteria.describe(),
            hits.len(),
        ));

        if hits.is_empty() {
            self.messenger
                .send_inline_keyboard(chat_id, texts::NO_RESULTS, texts::after_search_keyboard())
                .await?;
            return Ok(DialogueState::Idle);
        }

        if let Err(e) = self
            .messenger
            .send_chat_action(chat_id, ChatAction::UploadPhoto)
            .await
        {
            debug!(error = %e, "chat action failed");
        }
        for listing in &hits {
            self.send_hit(chat_id, listing).await?;
        }
        self.messenger
            .send_inline_keyboard(chat_id, texts::NEXT_ACTIONS, texts::after_search_keyboard())
            .await?;

        Ok(DialogueState::Idle)
    }

    /// Only the file id is stored, so a hit is tried as a photo first and
    /// re-sent as a document if Telegram rejects it.
    async fn send_hit(&self, chat_id: ChatId, listing: &Listing) -> Result<()> {
        let caption = self.fit_caption(listing_caption(listing));
        let as_photo = Photo::photo(listing.photo.clone());
        let Err(e) = self
            .messenger
            .send_media(chat_id, &as_photo, &caption, None)
            .await
        else {
            return Ok(());
        };

        warn!(listing_id = listing.id.0, error = %e, "sending as photo failed, retrying as document");
        let as_document = Photo::document(listing.photo.clone());
        if let Err(e) = self
            .messenger
            .send_media(chat_id, &as_document, &caption, None)
            .await
        {
            warn!(listing_id = listing.id.0, error = %e, "sending as document failed");
            self.messenger
                .send_html(chat_id, &escape_html(&caption))
                .await?;
        }
        Ok(())
    }

    // ============== Shared steps ==============

    async fn start_posting(&self, chat_id: ChatId) -> Result<DialogueState> {
        self.messenger
            .send_html(chat_id, texts::step_prompt(ListingStep::City))
            .await?;
        Ok(DialogueState::start_posting())
    }

    async fn show_start(&self, chat_id: ChatId) -> Result<()> {
        self.messenger
            .send_inline_keyboard(chat_id, texts::GREETING, texts::start_keyboard())
            .await?;
        Ok(())
    }

    async fn show_find_menu(&self, chat_id: ChatId) -> Result<()> {
        self.messenger
            .send_inline_keyboard(chat_id, texts::FIND_MENU, texts::find_keyboard())
            .await?;
        Ok(())
    }

    async fn send_preview(&self, chat_id: ChatId, listing: &NewListing, photo: &Photo) -> Result<()> {
        let caption = self.fit_caption(confirmation_caption(listing));
        let keyboard: InlineKeyboard = texts::confirm_keyboard();
        match self
            .messenger
            .send_media(chat_id, photo, &caption, Some(keyboard.clone()))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if photo.kind == PhotoKind::Photo => Err(e),
            Err(e) => {
                // Some image documents cannot be re-sent by file id; keep the
                // preview usable without the picture.
                warn!(error = %e, "preview with document failed, sending text preview");
                self.messenger
                    .send_inline_keyboard(chat_id, &escape_html(&caption), keyboard)
                    .await?;
                Ok(())
            }
        }
    }

    /// Cut a caption down to what the messenger accepts.
    fn fit_caption(&self, caption: String) -> String {
        let max = self.messenger.capabilities().max_caption_len;
        if caption.chars().count() <= max {
            return caption;
        }
        truncate_text(&caption, max.saturating_sub(3))
    }

    async fn rate_limited(&self, from: &Sender) -> Option<String> {
        let decision = self.rate_limiter.lock().await.check(from.user_id);
        match decision {
            RateDecision::Allowed => None,
            RateDecision::Limited { retry_after } => {
                let secs = retry_after.as_secs_f64();
                self.audit(AuditEvent::rate_limit(
                    from.user_id.0,
                    from.display_name(),
                    secs,
                ));
                Some(texts::rate_limited(secs.ceil()))
            }
        }
    }

    async fn answer_quietly(&self, q: &CallbackQuery, text: Option<&str>) {
        if let Err(e) = self
            .messenger
            .answer_callback_query(&q.callback_id, text)
            .await
        {
            debug!(error = %e, "answer_callback_query failed");
        }
    }

    async fn clear_keyboard_quietly(&self, msg: Option<MessageRef>) {
        let Some(msg) = msg else {
            return;
        };
        if let Err(e) = self.messenger.clear_keyboard(msg).await {
            debug!(error = %e, "clear_keyboard failed");
        }
    }

    async fn delete_quietly(&self, msg: MessageRef) {
        if let Err(e) = self.messenger.delete_message(msg).await {
            debug!(error = %e, "delete_message failed");
        }
    }

    fn audit(&self, event: AuditEvent) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.write(event) {
            warn!(error = %e, path = %audit.path().display(), "failed to write audit event");
        }
    }
}

fn max_len(step: ListingStep) -> usize {
    match step {
        ListingStep::City => MAX_CITY_LEN,
        ListingStep::Address => MAX_ADDRESS_LEN,
        ListingStep::Description => MAX_DESCRIPTION_LEN,
        ListingStep::Contacts => MAX_CONTACTS_LEN,
        ListingStep::Photo => MAX_PHOTO_LEN,
        ListingStep::Price => usize::MAX,
    }
}

fn summarize(listing: &NewListing) -> String {
    format!(
        "{} | {} | {} руб. | {}",
        listing.city, listing.address, listing.price, listing.contacts
    )
}
