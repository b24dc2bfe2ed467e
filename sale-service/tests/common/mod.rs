//! Shared harness for the sale-service integration tests.
//!
//! Everything runs on the in-process store and cache with a manual clock,
//! so tests control time and never need Docker.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sale_service::cache::{CacheError, MemoryReservationCache, ReservationCache};
use sale_service::clock::ManualClock;
use sale_service::models::{NewItem, NewSale};
use sale_service::service::SaleService;
use sale_service::store::{
    Allocation, AllocationError, AllocationRequest, MemoryStore, SaleStore, StoreError,
};
use shared::{Item, ItemId, PurchaseRecord, Reservation, Sale, SaleId, SaleSettings};
use tokio::time::Instant;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
}

pub fn settings(items_per_sale: i32, max_items_per_user: i32) -> SaleSettings {
    SaleSettings {
        items_per_sale,
        max_items_per_user,
        ..SaleSettings::default()
    }
}

pub fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryReservationCache>,
    pub clock: ManualClock,
    pub service: Arc<SaleService>,
}

impl Harness {
    pub fn new(settings: SaleSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryReservationCache::new());
        let clock = ManualClock::new(epoch());
        let service = Arc::new(SaleService::new(
            store.clone(),
            cache.clone(),
            Arc::new(clock.clone()),
            settings,
        ));
        Self {
            store,
            cache,
            clock,
            service,
        }
    }

    /// A second service over the same store and clock but a fresh, empty cache.
    pub fn with_cold_cache(&self, settings: SaleSettings) -> SaleService {
        SaleService::new(
            self.store.clone(),
            Arc::new(MemoryReservationCache::new()),
            Arc::new(self.clock.clone()),
            settings,
        )
    }

    /// Runs one scheduler cycle. The first sale of a harness owns item ids
    /// `1..=items_per_sale`.
    pub async fn open_sale(&self) -> Sale {
        self.service.scheduler().run_cycle().await.unwrap()
    }

    pub async fn checkout(&self, user_id: &str, item_id: ItemId) -> String {
        self.service
            .start_checkout(user_id, item_id, deadline())
            .await
            .unwrap()
    }
}

/// Opens a sale directly on the store, bypassing the scheduler.
pub async fn seed_sale(
    store: &MemoryStore,
    start: DateTime<Utc>,
    total_items: i32,
    item_count: usize,
) -> Sale {
    let sale = store
        .create_sale(NewSale {
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            total_items,
            sold_items: 0,
            is_active: true,
        })
        .await
        .unwrap();
    let items = (1..=item_count)
        .map(|n| NewItem {
            sale_id: sale.id,
            name: format!("Seeded #{n}"),
            image_url: String::new(),
            is_sold: false,
        })
        .collect();
    store.create_items(items).await.unwrap();
    sale
}

/// A cache whose every call fails the way an unreachable Redis does.
pub struct UnreachableCache;

fn refused() -> CacheError {
    CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl ReservationCache for UnreachableCache {
    async fn put(&self, _: &Reservation, _: Duration) -> Result<(), CacheError> {
        Err(refused())
    }

    async fn get(&self, _: &str) -> Result<Option<Reservation>, CacheError> {
        Err(refused())
    }

    async fn remove(&self, _: &str) -> Result<(), CacheError> {
        Err(refused())
    }
}

/// Delegates to a [`MemoryStore`] with injectable failures and latency.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_create_items: bool,
    pub fail_create_reservation: bool,
    pub fail_deactivate_all: bool,
    /// Delay in milliseconds applied before `active_sale` and `allocate`
    /// reach the inner store.
    pub latency_ms: AtomicU64,
}

impl FaultyStore {
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn lag(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Invalid(format!("injected {what} failure"))
}

#[async_trait]
impl SaleStore for FaultyStore {
    async fn deactivate_active_sales(&self) -> Result<usize, StoreError> {
        if self.fail_deactivate_all {
            return Err(injected("deactivate"));
        }
        self.inner.deactivate_active_sales().await
    }

    async fn create_sale(&self, sale: NewSale) -> Result<Sale, StoreError> {
        self.inner.create_sale(sale).await
    }

    async fn create_items(&self, items: Vec<NewItem>) -> Result<usize, StoreError> {
        if self.fail_create_items {
            return Err(injected("create items"));
        }
        self.inner.create_items(items).await
    }

    async fn deactivate_sale(&self, sale_id: SaleId) -> Result<(), StoreError> {
        self.inner.deactivate_sale(sale_id).await
    }

    async fn active_sale(&self, now: DateTime<Utc>) -> Result<Option<Sale>, StoreError> {
        self.lag().await;
        self.inner.active_sale(now).await
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        self.inner.sale(sale_id).await
    }

    async fn available_item(
        &self,
        item_id: ItemId,
        sale_id: SaleId,
    ) -> Result<Option<Item>, StoreError> {
        self.inner.available_item(item_id, sale_id).await
    }

    async fn purchase_count(&self, user_id: &str, sale_id: SaleId) -> Result<i32, StoreError> {
        self.inner.purchase_count(user_id, sale_id).await
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.fail_create_reservation {
            return Err(injected("create reservation"));
        }
        self.inner.create_reservation(reservation).await
    }

    async fn reservation(&self, token: &str) -> Result<Option<Reservation>, StoreError> {
        self.inner.reservation(token).await
    }

    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AllocationError> {
        self.lag().await;
        self.inner.allocate(request).await
    }

    async fn purchases_for_user(
        &self,
        user_id: &str,
        sale_id: SaleId,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        self.inner.purchases_for_user(user_id, sale_id).await
    }
}
