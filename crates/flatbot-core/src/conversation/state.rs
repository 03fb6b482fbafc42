use crate::listing::{NewListing, Photo, PriceBound};

/// Per-chat position in the conversation.
///
/// Stored by the transport's dialogue storage between updates; `Idle` is what a
/// chat without stored state starts in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DialogueState {
    #[default]
    Idle,
    /// Collecting the fields of a new listing, one per message.
    Posting {
        step: ListingStep,
        draft: ListingDraft,
    },
    /// Preview sent, waiting for the "Да" / "Нет" buttons.
    Confirming { listing: NewListing, photo: Photo },
    /// Next text message is the city to search for.
    SearchingCity,
    /// Next text message is the price threshold.
    SearchingPrice(PriceDirection),
}

impl DialogueState {
    pub fn start_posting() -> Self {
        DialogueState::Posting {
            step: ListingStep::City,
            draft: ListingDraft::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::Posting { step, .. } => step.name(),
            DialogueState::Confirming { .. } => "confirming",
            DialogueState::SearchingCity => "searching_city",
            DialogueState::SearchingPrice(_) => "searching_price",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingStep {
    City,
    Address,
    Description,
    Photo,
    Contacts,
    Price,
}

impl ListingStep {
    pub fn next(self) -> Option<Self> {
        match self {
            ListingStep::City => Some(ListingStep::Address),
            ListingStep::Address => Some(ListingStep::Description),
            ListingStep::Description => Some(ListingStep::Photo),
            ListingStep::Photo => Some(ListingStep::Contacts),
            ListingStep::Contacts => Some(ListingStep::Price),
            ListingStep::Price => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ListingStep::City => "posting_city",
            ListingStep::Address => "posting_address",
            ListingStep::Description => "posting_description",
            ListingStep::Photo => "posting_photo",
            ListingStep::Contacts => "posting_contacts",
            ListingStep::Price => "posting_price",
        }
    }
}

/// Fields collected so far for a new listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingDraft {
    pub city: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub photo: Option<Photo>,
    pub contacts: Option<String>,
}

impl ListingDraft {
    /// Store a text answer for `step`. Photo and price are not text fields.
    pub fn set_text(&mut self, step: ListingStep, value: String) {
        match step {
            ListingStep::City => self.city = Some(value),
            ListingStep::Address => self.address = Some(value),
            ListingStep::Description => self.description = Some(value),
            ListingStep::Contacts => self.contacts = Some(value),
            ListingStep::Photo | ListingStep::Price => {}
        }
    }

    /// Complete the draft with the price; `None` if any field is missing.
    pub fn into_listing(self, price: i32) -> Option<(NewListing, Photo)> {
        let photo = self.photo?;
        let listing = NewListing {
            city: self.city?,
            address: self.address?,
            description: self.description?,
            photo: photo.file_id.clone(),
            contacts: self.contacts?,
            price,
        };
        Some((listing, photo))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceDirection {
    Above,
    Below,
}

impl PriceDirection {
    pub fn bound(self, price: i32) -> PriceBound {
        match self {
            PriceDirection::Above => PriceBound::Above(price),
            PriceDirection::Below => PriceBound::Below(price),
        }
    }
}
