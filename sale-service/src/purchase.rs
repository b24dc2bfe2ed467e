use std::sync::Arc;

use shared::{Item, PurchaseError, Reservation, SaleSettings};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use crate::cache::ReservationLookup;
use crate::clock::Clock;
use crate::store::{AllocationError, AllocationRequest, SaleStore};

/// Turns a checkout code into a purchased item.
///
/// Phase A resolves and validates the code without taking any lock.
/// Phase B is a single store transaction that decides which of the
/// concurrent holders of valid codes for an item actually gets it.
pub struct PurchaseEngine {
    store: Arc<dyn SaleStore>,
    lookup: ReservationLookup,
    clock: Arc<dyn Clock>,
    settings: SaleSettings,
}

impl PurchaseEngine {
    pub fn new(
        store: Arc<dyn SaleStore>,
        lookup: ReservationLookup,
        clock: Arc<dyn Clock>,
        settings: SaleSettings,
    ) -> Self {
        Self { store, lookup, clock, settings }
    }

    pub async fn purchase(&self, token: &str, deadline: Instant) -> Result<Item, PurchaseError> {
        let attempt = async {
            let reservation = self.resolve_valid(token).await?;
            self.allocate(&reservation, deadline).await
        };

        let item = match timeout_at(deadline, attempt).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Purchase for code {} exceeded its deadline, rolled back", token);
                return Err(PurchaseError::PurchaseFailed);
            }
        };

        // A lingering entry is harmless: the store still says the code is used.
        self.lookup.evict(token).await;

        Ok(item)
    }

    /// Phase A: no durable mutation happens here.
    async fn resolve_valid(&self, token: &str) -> Result<Reservation, PurchaseError> {
        let reservation = self
            .lookup
            .resolve(token)
            .await
            .map_err(|e| {
                error!("Failed to look up checkout code {}: {}", token, e);
                PurchaseError::PurchaseFailed
            })?
            .ok_or(PurchaseError::TokenInvalid)?;

        let now = self.clock.now();
        if reservation.is_used {
            return Err(PurchaseError::TokenAlreadyUsed);
        }
        if reservation.is_expired_at(now) {
            return Err(PurchaseError::TokenExpired);
        }

        let sale = self
            .store
            .sale(reservation.sale_id)
            .await
            .map_err(|e| {
                error!("Failed to load sale {} for code {}: {}", reservation.sale_id, token, e);
                PurchaseError::PurchaseFailed
            })?;
        match sale {
            Some(sale) if sale.is_open_at(now) => Ok(reservation),
            _ => Err(PurchaseError::SaleNotActive),
        }
    }

    /// Phase B: one atomic allocation.
    async fn allocate(
        &self,
        reservation: &Reservation,
        deadline: Instant,
    ) -> Result<Item, PurchaseError> {
        let request = AllocationRequest {
            token: reservation.token.clone(),
            user_id: reservation.user_id.clone(),
            item_id: reservation.item_id,
            sale_id: reservation.sale_id,
            max_items_per_user: self.settings.max_items_per_user,
            now: self.clock.now(),
            deadline: Some(deadline),
        };

        match self.store.allocate(&request).await {
            Ok(allocation) => {
                debug!(
                    "User {} purchased item {} with code {}",
                    allocation.purchase.user_id, allocation.item.id, reservation.token
                );
                Ok(allocation.item)
            }
            Err(AllocationError::ReservationUsed) => Err(PurchaseError::TokenAlreadyUsed),
            Err(AllocationError::ItemAlreadySold) => Err(PurchaseError::ItemAlreadySold),
            Err(AllocationError::SaleNotActive) => Err(PurchaseError::SaleNotActive),
            Err(AllocationError::SaleLimitReached) => Err(PurchaseError::SaleLimitReached),
            Err(AllocationError::UserLimitReached) => Err(PurchaseError::UserLimitReached),
            Err(e @ AllocationError::ItemNotFound(_)) | Err(e @ AllocationError::Store(_)) => {
                error!(
                    "Error during purchase transaction for code {}: {}",
                    reservation.token, e
                );
                Err(PurchaseError::PurchaseFailed)
            }
        }
    }
}
