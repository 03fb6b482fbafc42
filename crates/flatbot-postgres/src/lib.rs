//! PostgreSQL storage for listings (the `flats` table).

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    FromRow, PgPool,
};

use flatbot_core::{
    config::{DatabaseConfig, DatabaseTarget},
    domain::ListingId,
    listing::{normalize_city, Listing, NewListing},
    store::ListingStore,
    Error, Result,
};

/// Row type for `flats` queries. Every column except `id` is nullable.
#[derive(FromRow)]
struct FlatRow {
    id: i32,
    city: Option<String>,
    address: Option<String>,
    description: Option<String>,
    photo: Option<String>,
    contacts: Option<String>,
    price: Option<i32>,
}

impl From<FlatRow> for Listing {
    fn from(row: FlatRow) -> Self {
        Listing {
            id: ListingId(i64::from(row.id)),
            city: row.city.unwrap_or_default(),
            address: row.address.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            photo: row.photo.unwrap_or_default(),
            contacts: row.contacts.unwrap_or_default(),
            price: row.price.unwrap_or_default(),
        }
    }
}

const SELECT_FLATS: &str =
    "SELECT id, city, address, description, photo, contacts, price FROM flats";

fn storage_err(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{context}: {e}"))
}

/// Listing store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect (retrying while the database comes up) and apply migrations.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(&cfg.target)?;
        let attempts = cfg.connect_retries.max(1);

        let mut attempt = 0;
        let pool = loop {
            attempt += 1;
            match PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "database not reachable, retrying in {:?}",
                        cfg.connect_delay
                    );
                    tokio::time::sleep(cfg.connect_delay).await;
                }
                Err(e) => return Err(storage_err("connect")(e)),
            }
        };
        tracing::info!(attempt, "connected to database");

        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Storage(format!("migrate: {e}")))?;

        Ok(Self::new(pool))
    }

    async fn fetch(&self, sql: &str, bind: FetchBind<'_>) -> Result<Vec<Listing>> {
        let query = sqlx::query_as::<_, FlatRow>(sql);
        let query = match bind {
            FetchBind::Price(p) => query.bind(p),
            FetchBind::City(c) => query.bind(c),
        };
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err("select flats"))?;
        Ok(rows.into_iter().map(Listing::from).collect())
    }
}

enum FetchBind<'a> {
    Price(i32),
    City(&'a str),
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn insert(&self, listing: &NewListing) -> Result<ListingId> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO flats (city, address, description, photo, contacts, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(normalize_city(&listing.city))
        .bind(&listing.address)
        .bind(&listing.description)
        .bind(&listing.photo)
        .bind(&listing.contacts)
        .bind(listing.price)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err("insert flat"))?;

        Ok(ListingId(i64::from(id)))
    }

    async fn find_price_above(&self, price: i32) -> Result<Vec<Listing>> {
        self.fetch(
            &format!("{SELECT_FLATS} WHERE price > $1 ORDER BY id"),
            FetchBind::Price(price),
        )
        .await
    }

    async fn find_price_below(&self, price: i32) -> Result<Vec<Listing>> {
        self.fetch(
            &format!("{SELECT_FLATS} WHERE price < $1 ORDER BY id"),
            FetchBind::Price(price),
        )
        .await
    }

    async fn find_by_city(&self, city: &str) -> Result<Vec<Listing>> {
        let city = normalize_city(city);
        self.fetch(
            &format!("{SELECT_FLATS} WHERE city = $1 ORDER BY id"),
            FetchBind::City(&city),
        )
        .await
    }
}

fn connect_options(target: &DatabaseTarget) -> Result<PgConnectOptions> {
    match target {
        DatabaseTarget::Url(url) => PgConnectOptions::from_str(url.expose())
            .map_err(|e| Error::Config(format!("DATABASE_URL is invalid: {e}"))),
        DatabaseTarget::Params {
            host,
            port,
            user,
            password,
            database,
        } => Ok(PgConnectOptions::new()
            .host(host)
            .port(*port)
            .username(user)
            .password(password.expose())
            .database(database)),
    }
}
