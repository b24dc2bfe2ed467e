use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use shared::{CheckoutError, ItemId, Reservation, SaleSettings};
use tokio::time::{timeout_at, Instant};
use tracing::{error, warn};

use crate::cache::ReservationLookup;
use crate::clock::Clock;
use crate::store::{SaleStore, StoreError};

/// 128 bits of entropy; collisions are not retried.
const CHECKOUT_CODE_BYTES: usize = 16;

pub fn generate_checkout_code() -> Result<String, rand::Error> {
    let mut bytes = [0u8; CHECKOUT_CODE_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Admission: validates a checkout request and issues a checkout code.
///
/// Nothing here locks or decrements inventory. Two users may hold codes
/// for the same item; the purchase transaction decides who gets it.
pub struct ReservationManager {
    store: Arc<dyn SaleStore>,
    lookup: ReservationLookup,
    clock: Arc<dyn Clock>,
    settings: SaleSettings,
}

impl ReservationManager {
    pub fn new(
        store: Arc<dyn SaleStore>,
        lookup: ReservationLookup,
        clock: Arc<dyn Clock>,
        settings: SaleSettings,
    ) -> Self {
        Self { store, lookup, clock, settings }
    }

    pub async fn checkout(
        &self,
        user_id: &str,
        item_id: ItemId,
        deadline: Instant,
    ) -> Result<String, CheckoutError> {
        let reservation = match timeout_at(deadline, self.reserve(user_id, item_id)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Checkout for user {} item {} exceeded its deadline", user_id, item_id);
                return Err(CheckoutError::ReservationFailed);
            }
        };

        // The durable row is already written; the cache copy is an optimization.
        self.lookup
            .mirror(&reservation, self.settings.reservation_ttl)
            .await;

        Ok(reservation.token)
    }

    async fn reserve(&self, user_id: &str, item_id: ItemId) -> Result<Reservation, CheckoutError> {
        let now = self.clock.now();

        let sale = self
            .store
            .active_sale(now)
            .await
            .map_err(|e| store_failure("fetch active sale", user_id, item_id, e))?
            .ok_or(CheckoutError::SaleNotActive)?;

        self.store
            .available_item(item_id, sale.id)
            .await
            .map_err(|e| store_failure("fetch item", user_id, item_id, e))?
            .ok_or(CheckoutError::ItemUnavailable)?;

        let purchased = self
            .store
            .purchase_count(user_id, sale.id)
            .await
            .map_err(|e| store_failure("fetch purchase count", user_id, item_id, e))?;
        if purchased >= self.settings.max_items_per_user {
            return Err(CheckoutError::UserLimitReached);
        }

        let token = generate_checkout_code().map_err(|e| {
            error!("Failed to generate checkout code for user {}: {}", user_id, e);
            CheckoutError::ReservationFailed
        })?;

        let reservation = Reservation {
            token,
            user_id: user_id.to_string(),
            item_id,
            sale_id: sale.id,
            expires_at: now + self.settings.reservation_span(),
            is_used: false,
            created_at: now,
        };

        self.store
            .create_reservation(&reservation)
            .await
            .map_err(|e| store_failure("save checkout attempt", user_id, item_id, e))?;

        Ok(reservation)
    }
}

fn store_failure(step: &str, user_id: &str, item_id: ItemId, e: StoreError) -> CheckoutError {
    error!(
        "Checkout failed to {} for user {} item {}: {}",
        step, user_id, item_id, e
    );
    CheckoutError::ReservationFailed
}
