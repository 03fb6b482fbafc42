//! Listing records, search criteria and the text rules shared by the
//! conversation and the stores.

use std::sync::OnceLock;

use regex::Regex;

use crate::{domain::ListingId, errors::Error, Result};

// Column widths of the `flats` table.
pub const MAX_CITY_LEN: usize = 50;
pub const MAX_ADDRESS_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 200;
pub const MAX_PHOTO_LEN: usize = 200;
pub const MAX_CONTACTS_LEN: usize = 200;

/// How the user attached the listing image.
///
/// Telegram file ids of compressed photos and of documents are not
/// interchangeable when sending, so the kind travels with the id until the
/// listing is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhotoKind {
    Photo,
    Document,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Photo {
    pub file_id: String,
    pub kind: PhotoKind,
}

impl Photo {
    pub fn photo(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            kind: PhotoKind::Photo,
        }
    }

    pub fn document(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            kind: PhotoKind::Document,
        }
    }
}

/// Insert payload for the `flats` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewListing {
    pub city: String,
    pub address: String,
    pub description: String,
    pub photo: String,
    pub contacts: String,
    pub price: i32,
}

/// A stored listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub id: ListingId,
    pub city: String,
    pub address: String,
    pub description: String,
    pub photo: String,
    pub contacts: String,
    pub price: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceBound {
    /// Strictly greater than.
    Above(i32),
    /// Strictly less than.
    Below(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchCriteria {
    City(String),
    Price(PriceBound),
}

impl SearchCriteria {
    /// Short form for logs and the audit trail.
    pub fn describe(&self) -> String {
        match self {
            SearchCriteria::City(c) => format!("city={}", normalize_city(c)),
            SearchCriteria::Price(PriceBound::Above(p)) => format!("price>{p}"),
            SearchCriteria::Price(PriceBound::Below(p)) => format!("price<{p}"),
        }
    }
}

/// Cities are stored and matched lowercased.
pub fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Capitalize every word: "санкт-петербург" -> "Санкт-Петербург".
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

fn price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*([0-9][0-9 \u{a0}]*?)\s*(?:руб(?:\.|лей|ля|ль)?|р\.?|₽|rub)?\s*$")
            .expect("price regex is valid")
    })
}

/// Parse a monthly price typed by the user.
///
/// Accepts ASCII digits with digit-group spaces and a trailing currency suffix
/// ("25 000 руб"). Other Unicode digits are rejected.
pub fn parse_price(input: &str) -> Result<i32> {
    let caps = price_re()
        .captures(input)
        .ok_or_else(|| Error::Validation(format!("not a price: {input:?}")))?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<i32>()
        .map_err(|_| Error::Validation(format!("price out of range: {input:?}")))
}

/// Reject values that would not fit their column.
pub fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(Error::Validation(format!(
            "{field} is {len} chars, max {max}"
        )));
    }
    Ok(())
}

/// Caption of the preview shown before the user confirms a new listing.
pub fn confirmation_caption(listing: &NewListing) -> String {
    format!(
        "Итоговый результат:\nГород: {}\nАдрес: {}\nОписание: {}\nКонтакты: {}\nЦена: {} руб.\n\nВсё верно?",
        listing.city, listing.address, listing.description, listing.contacts, listing.price
    )
}

/// Caption of a search hit.
pub fn listing_caption(listing: &Listing) -> String {
    format!(
        "Город: {}\nАдрес: {}\nОписание: {}\nКонтакты: {}\nЦена: {} руб.",
        title_case(&listing.city),
        listing.address,
        listing.description,
        listing.contacts,
        listing.price
    )
}
