use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Item, ItemId, PurchaseRecord, Reservation, Sale, SaleId};
use tokio::time::Instant;
use uuid::Uuid;

use super::{Allocation, AllocationError, AllocationRequest, SaleStore, StoreError};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies pending migrations over a blocking connection. Call before
/// building the pool.
pub fn run_migrations(database_url: &str) -> Result<(), StoreError> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    Ok(())
}

// Four columns per row keeps each statement well under the 65535 bind limit.
const ITEM_INSERT_CHUNK: usize = 5_000;

const UPSERT_USER_COUNTER: &str = "\
    INSERT INTO user_sale_limits (user_id, sale_id, items_purchased) \
    VALUES ($1, $2, 1) \
    ON CONFLICT (user_id, sale_id) \
    DO UPDATE SET items_purchased = user_sale_limits.items_purchased + 1 \
    WHERE user_sale_limits.items_purchased < $3";

pub struct PgSaleStore {
    pool: DbPool,
}

impl PgSaleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_size: u32) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(config)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SaleStore for PgSaleStore {
    async fn deactivate_active_sales(&self) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(sales::table.filter(sales::is_active.eq(true)))
            .set((
                sales::is_active.eq(false),
                sales::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(updated)
    }

    async fn create_sale(&self, sale: NewSale) -> Result<Sale, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(sales::table)
            .values(&sale)
            .get_result::<SaleRow>(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn create_items(&self, new_items: Vec<NewItem>) -> Result<usize, StoreError> {
        if new_items.is_empty() {
            return Err(StoreError::Invalid("no items to create".to_string()));
        }

        let mut conn = self.pool.get().await?;
        conn.transaction::<_, StoreError, _>(move |conn| {
            Box::pin(async move {
                let mut created = 0;
                for chunk in new_items.chunks(ITEM_INSERT_CHUNK) {
                    created += diesel::insert_into(items::table)
                        .values(chunk)
                        .execute(conn)
                        .await?;
                }
                Ok(created)
            })
        })
        .await
    }

    async fn deactivate_sale(&self, sale_id: SaleId) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(sales::table.find(sale_id))
            .set((
                sales::is_active.eq(false),
                sales::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn active_sale(&self, now: DateTime<Utc>) -> Result<Option<Sale>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = sales::table
            .filter(sales::is_active.eq(true))
            .filter(sales::start_time.le(now))
            .filter(sales::end_time.gt(now))
            .order(sales::start_time.desc())
            .first::<SaleRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Sale::from))
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = sales::table
            .find(sale_id)
            .first::<SaleRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Sale::from))
    }

    async fn available_item(
        &self,
        item_id: ItemId,
        sale_id: SaleId,
    ) -> Result<Option<Item>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = items::table
            .filter(items::id.eq(item_id))
            .filter(items::sale_id.eq(sale_id))
            .filter(items::is_sold.eq(false))
            .first::<ItemRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Item::from))
    }

    async fn purchase_count(&self, user_id: &str, sale_id: SaleId) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        let count = user_sale_limits::table
            .filter(user_sale_limits::user_id.eq(user_id))
            .filter(user_sale_limits::sale_id.eq(sale_id))
            .select(user_sale_limits::items_purchased)
            .first::<i32>(&mut conn)
            .await
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(checkout_attempts::table)
            .values(CheckoutAttempt::from(reservation))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn reservation(&self, token: &str) -> Result<Option<Reservation>, StoreError> {
        let mut conn = self.pool.get().await?;
        let attempt = checkout_attempts::table
            .find(token)
            .first::<CheckoutAttempt>(&mut conn)
            .await
            .optional()?;
        Ok(attempt.map(Reservation::from))
    }

    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AllocationError> {
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;

        // Remaining time is measured after the pool wait.
        let statement_timeout_ms = match request.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(StoreError::Timeout.into());
                }
                Some(remaining.as_millis().max(1))
            }
            None => None,
        };

        let request = request.clone();

        conn.transaction::<_, AllocationError, _>(move |conn| {
            Box::pin(async move {
                if let Some(ms) = statement_timeout_ms {
                    diesel::sql_query(format!("SET LOCAL statement_timeout = {ms}"))
                        .execute(conn)
                        .await?;
                }

                let item = items::table
                    .filter(items::id.eq(request.item_id))
                    .filter(items::sale_id.eq(request.sale_id))
                    .for_update()
                    .first::<ItemRow>(conn)
                    .await
                    .optional()?
                    .ok_or(AllocationError::ItemNotFound(request.item_id))?;

                // The item lock serializes every purchase of this item, so
                // this read cannot race with the code being consumed.
                let used = checkout_attempts::table
                    .find(&request.token)
                    .select(checkout_attempts::is_used)
                    .first::<bool>(conn)
                    .await
                    .optional()?;
                if used == Some(true) {
                    return Err(AllocationError::ReservationUsed);
                }
                if item.is_sold {
                    return Err(AllocationError::ItemAlreadySold);
                }

                let sale: Sale = sales::table
                    .find(request.sale_id)
                    .for_update()
                    .first::<SaleRow>(conn)
                    .await
                    .optional()?
                    .ok_or(AllocationError::SaleNotActive)?
                    .into();
                if !sale.is_open_at(request.now) {
                    return Err(AllocationError::SaleNotActive);
                }
                if sale.is_exhausted() {
                    return Err(AllocationError::SaleLimitReached);
                }

                let purchased = user_sale_limits::table
                    .filter(user_sale_limits::user_id.eq(&request.user_id))
                    .filter(user_sale_limits::sale_id.eq(request.sale_id))
                    .select(user_sale_limits::items_purchased)
                    .for_update()
                    .first::<i32>(conn)
                    .await
                    .optional()?
                    .unwrap_or(0);
                if purchased >= request.max_items_per_user {
                    return Err(AllocationError::UserLimitReached);
                }

                diesel::update(items::table.find(item.id))
                    .set((
                        items::is_sold.eq(true),
                        items::updated_at.eq(Some(request.now)),
                    ))
                    .execute(conn)
                    .await?;

                diesel::update(sales::table.find(sale.id))
                    .set((
                        sales::sold_items.eq(sales::sold_items + 1),
                        sales::updated_at.eq(Some(request.now)),
                    ))
                    .execute(conn)
                    .await?;

                let purchase = PurchaseRecord {
                    id: Uuid::new_v4(),
                    user_id: request.user_id.clone(),
                    item_id: item.id,
                    sale_id: sale.id,
                    checkout_code: request.token.clone(),
                    purchased_at: request.now,
                };
                diesel::insert_into(purchases::table)
                    .values(PurchaseRow::from(&purchase))
                    .execute(conn)
                    .await?;

                // Zero rows means a concurrent upsert got there first.
                let counted = diesel::sql_query(UPSERT_USER_COUNTER)
                    .bind::<Text, _>(request.user_id.clone())
                    .bind::<BigInt, _>(request.sale_id)
                    .bind::<Integer, _>(request.max_items_per_user)
                    .execute(conn)
                    .await?;
                if counted == 0 {
                    return Err(AllocationError::UserLimitReached);
                }

                diesel::update(checkout_attempts::table.find(&request.token))
                    .set(checkout_attempts::is_used.eq(true))
                    .execute(conn)
                    .await?;

                let mut item = Item::from(item);
                item.is_sold = true;
                Ok(Allocation { item, purchase })
            })
        })
        .await
    }

    async fn purchases_for_user(
        &self,
        user_id: &str,
        sale_id: SaleId,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = purchases::table
            .filter(purchases::user_id.eq(user_id))
            .filter(purchases::sale_id.eq(sale_id))
            .order(purchases::purchased_at.asc())
            .load::<PurchaseRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(PurchaseRecord::from).collect())
    }
}
