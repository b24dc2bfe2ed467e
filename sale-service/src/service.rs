use std::sync::Arc;

use shared::{CheckoutError, ItemId, PurchaseError, PurchaseRecord, Sale, SaleSettings};
use tokio::time::Instant;

use crate::cache::{ReservationCache, ReservationLookup};
use crate::checkout::ReservationManager;
use crate::clock::Clock;
use crate::purchase::PurchaseEngine;
use crate::scheduler::SaleScheduler;
use crate::store::{SaleStore, StoreError};

/// The boundary operations offered to the transport layer.
pub struct SaleService {
    store: Arc<dyn SaleStore>,
    clock: Arc<dyn Clock>,
    reservations: ReservationManager,
    purchases: PurchaseEngine,
    settings: SaleSettings,
}

impl SaleService {
    pub fn new(
        store: Arc<dyn SaleStore>,
        cache: Arc<dyn ReservationCache>,
        clock: Arc<dyn Clock>,
        settings: SaleSettings,
    ) -> Self {
        let lookup = ReservationLookup::new(store.clone(), cache);
        Self {
            reservations: ReservationManager::new(
                store.clone(),
                lookup.clone(),
                clock.clone(),
                settings.clone(),
            ),
            purchases: PurchaseEngine::new(store.clone(), lookup, clock.clone(), settings.clone()),
            settings,
            store,
            clock,
        }
    }

    /// A scheduler sharing this service's store and clock.
    pub fn scheduler(&self) -> SaleScheduler {
        SaleScheduler::new(self.store.clone(), self.clock.clone(), self.settings.clone())
    }

    pub async fn start_checkout(
        &self,
        user_id: &str,
        item_id: ItemId,
        deadline: Instant,
    ) -> Result<String, CheckoutError> {
        self.reservations.checkout(user_id, item_id, deadline).await
    }

    pub async fn complete_purchase(
        &self,
        token: &str,
        deadline: Instant,
    ) -> Result<ItemId, PurchaseError> {
        let item = self.purchases.purchase(token, deadline).await?;
        Ok(item.id)
    }

    pub async fn current_sale(&self) -> Result<Option<Sale>, StoreError> {
        self.store.active_sale(self.clock.now()).await
    }

    pub async fn purchases_in_current_sale(
        &self,
        user_id: &str,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        match self.current_sale().await? {
            Some(sale) => self.store.purchases_for_user(user_id, sale.id).await,
            None => Ok(Vec::new()),
        }
    }
}
