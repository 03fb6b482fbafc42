use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    domain::ListingId,
    listing::{normalize_city, Listing, NewListing, PriceBound, SearchCriteria},
    Result,
};

/// Port for the `flats` table.
///
/// Implementations normalize the city on insert and on lookup, and return rows
/// ordered by id.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn insert(&self, listing: &NewListing) -> Result<ListingId>;

    /// Listings with `price > price`.
    async fn find_price_above(&self, price: i32) -> Result<Vec<Listing>>;

    /// Listings with `price < price`.
    async fn find_price_below(&self, price: i32) -> Result<Vec<Listing>>;

    async fn find_by_city(&self, city: &str) -> Result<Vec<Listing>>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Listing>> {
        match criteria {
            SearchCriteria::City(city) => self.find_by_city(city).await,
            SearchCriteria::Price(PriceBound::Above(p)) => self.find_price_above(*p).await,
            SearchCriteria::Price(PriceBound::Below(p)) => self.find_price_below(*p).await,
        }
    }
}

/// In-process store, used by tests and by `STORAGE=memory` runs.
#[derive(Default)]
pub struct MemoryListingStore {
    rows: RwLock<Vec<Listing>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn filter(&self, pred: impl Fn(&Listing) -> bool + Send) -> Vec<Listing> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|l| pred(l))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn insert(&self, listing: &NewListing) -> Result<ListingId> {
        let mut rows = self.rows.write().await;
        let id = ListingId(rows.last().map(|l| l.id.0).unwrap_or(0) + 1);
        rows.push(Listing {
            id,
            city: normalize_city(&listing.city),
            address: listing.address.clone(),
            description: listing.description.clone(),
            photo: listing.photo.clone(),
            contacts: listing.contacts.clone(),
            price: listing.price,
        });
        Ok(id)
    }

    async fn find_price_above(&self, price: i32) -> Result<Vec<Listing>> {
        Ok(self.filter(|l| l.price > price).await)
    }

    async fn find_price_below(&self, price: i32) -> Result<Vec<Listing>> {
        Ok(self.filter(|l| l.price < price).await)
    }

    async fn find_by_city(&self, city: &str) -> Result<Vec<Listing>> {
        let city = normalize_city(city);
        Ok(self.filter(|l| l.city == city).await)
    }
}
