//! Durable store: the system of record for sales, items, reservations,
//! purchases and per-user counters.
//!
//! Two backends implement [`SaleStore`]: [`PgSaleStore`] on Postgres and
//! [`MemoryStore`], an in-process arena with one lock per entity.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{run_migrations, DbPool, PgSaleStore, MIGRATIONS};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel_async::pooled_connection::PoolError;
use shared::{Item, ItemId, PurchaseRecord, Reservation, Sale, SaleId};
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{NewItem, NewSale};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("store deadline exceeded")]
    Timeout,
    #[error("invalid write: {0}")]
    Invalid(String),
    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Everything Phase B needs, captured from a validated reservation.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub token: String,
    pub user_id: String,
    pub item_id: ItemId,
    pub sale_id: SaleId,
    pub max_items_per_user: i32,
    pub now: DateTime<Utc>,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub item: Item,
    pub purchase: PurchaseRecord,
}

/// Why an allocation transaction rolled back.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("checkout code already used")]
    ReservationUsed,
    #[error("item already sold")]
    ItemAlreadySold,
    #[error("item {0} not found in sale")]
    ItemNotFound(ItemId),
    #[error("sale is not active or has ended")]
    SaleNotActive,
    #[error("sale item limit reached")]
    SaleLimitReached,
    #[error("user purchase limit for this sale reached")]
    UserLimitReached,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for AllocationError {
    fn from(e: diesel::result::Error) -> Self {
        AllocationError::Store(StoreError::Database(e))
    }
}

#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Clears the active flag on every active sale, returning how many changed.
    async fn deactivate_active_sales(&self) -> Result<usize, StoreError>;

    async fn create_sale(&self, sale: NewSale) -> Result<Sale, StoreError>;

    /// Bulk-inserts items in one transaction, returning how many were written.
    async fn create_items(&self, items: Vec<NewItem>) -> Result<usize, StoreError>;

    async fn deactivate_sale(&self, sale_id: SaleId) -> Result<(), StoreError>;

    /// The newest sale that is flagged active and open at `now`.
    async fn active_sale(&self, now: DateTime<Utc>) -> Result<Option<Sale>, StoreError>;

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError>;

    /// The item if it belongs to `sale_id` and is still unsold.
    async fn available_item(
        &self,
        item_id: ItemId,
        sale_id: SaleId,
    ) -> Result<Option<Item>, StoreError>;

    async fn purchase_count(&self, user_id: &str, sale_id: SaleId) -> Result<i32, StoreError>;

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn reservation(&self, token: &str) -> Result<Option<Reservation>, StoreError>;

    /// Converts a reservation into a purchase atomically.
    ///
    /// Locks are taken item first, then sale, then the user counter. The
    /// code's used flag is re-read while the item is locked. Every check
    /// happens under those locks, and any failure leaves the store exactly
    /// as it was.
    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AllocationError>;

    async fn purchases_for_user(
        &self,
        user_id: &str,
        sale_id: SaleId,
    ) -> Result<Vec<PurchaseRecord>, StoreError>;
}
