use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Item, ItemId, PurchaseRecord, Reservation, Sale, SaleId};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{Allocation, AllocationError, AllocationRequest, SaleStore, StoreError};
use crate::models::{NewItem, NewSale};

type Slot<T> = Arc<Mutex<T>>;

/// In-process durable store.
///
/// Every sale, item, reservation and user counter lives behind its own
/// mutex. The maps only hand out slots; they are never held while waiting
/// on an entity lock. Allocation locks item, reservation, sale and counter
/// in that order and mutates only once all checks have passed, so dropping
/// the future at any await point leaves nothing half-applied.
pub struct MemoryStore {
    next_sale_id: AtomicI64,
    next_item_id: AtomicI64,
    sales: RwLock<BTreeMap<SaleId, Slot<Sale>>>,
    items: RwLock<HashMap<ItemId, Slot<Item>>>,
    reservations: RwLock<HashMap<String, Slot<Reservation>>>,
    counters: Mutex<HashMap<(String, SaleId), Slot<i32>>>,
    purchases: RwLock<Vec<PurchaseRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_sale_id: AtomicI64::new(1),
            next_item_id: AtomicI64::new(1),
            sales: RwLock::new(BTreeMap::new()),
            items: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            purchases: RwLock::new(Vec::new()),
        }
    }

    /// Number of purchase records written for a sale.
    pub async fn purchase_total(&self, sale_id: SaleId) -> usize {
        self.purchases
            .read()
            .await
            .iter()
            .filter(|p| p.sale_id == sale_id)
            .count()
    }

    /// Number of items of a sale currently flagged sold.
    pub async fn sold_item_total(&self, sale_id: SaleId) -> usize {
        let slots: Vec<Slot<Item>> = self.items.read().await.values().cloned().collect();
        let mut sold = 0;
        for slot in slots {
            let item = slot.lock().await;
            if item.sale_id == sale_id && item.is_sold {
                sold += 1;
            }
        }
        sold
    }

    async fn sale_slot(&self, sale_id: SaleId) -> Option<Slot<Sale>> {
        self.sales.read().await.get(&sale_id).cloned()
    }

    async fn counter_slot(&self, user_id: &str, sale_id: SaleId) -> Slot<i32> {
        self.counters
            .lock()
            .await
            .entry((user_id.to_string(), sale_id))
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }
}

#[async_trait]
impl SaleStore for MemoryStore {
    async fn deactivate_active_sales(&self) -> Result<usize, StoreError> {
        let slots: Vec<Slot<Sale>> = self.sales.read().await.values().cloned().collect();
        let mut updated = 0;
        for slot in slots {
            let mut sale = slot.lock().await;
            if sale.is_active {
                sale.is_active = false;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn create_sale(&self, new_sale: NewSale) -> Result<Sale, StoreError> {
        let sale = Sale {
            id: self.next_sale_id.fetch_add(1, Ordering::SeqCst),
            start_time: new_sale.start_time,
            end_time: new_sale.end_time,
            total_items: new_sale.total_items,
            sold_items: new_sale.sold_items,
            is_active: new_sale.is_active,
        };
        self.sales
            .write()
            .await
            .insert(sale.id, Arc::new(Mutex::new(sale.clone())));
        Ok(sale)
    }

    async fn create_items(&self, new_items: Vec<NewItem>) -> Result<usize, StoreError> {
        if new_items.is_empty() {
            return Err(StoreError::Invalid("no items to create".to_string()));
        }
        {
            let sales = self.sales.read().await;
            if let Some(missing) = new_items.iter().find(|i| !sales.contains_key(&i.sale_id)) {
                return Err(StoreError::Invalid(format!(
                    "sale {} does not exist",
                    missing.sale_id
                )));
            }
        }

        let mut items = self.items.write().await;
        let created = new_items.len();
        for new_item in new_items {
            let id = self.next_item_id.fetch_add(1, Ordering::SeqCst);
            let item = Item {
                id,
                sale_id: new_item.sale_id,
                name: new_item.name,
                image_url: new_item.image_url,
                is_sold: new_item.is_sold,
            };
            items.insert(id, Arc::new(Mutex::new(item)));
        }
        Ok(created)
    }

    async fn deactivate_sale(&self, sale_id: SaleId) -> Result<(), StoreError> {
        if let Some(slot) = self.sale_slot(sale_id).await {
            slot.lock().await.is_active = false;
        }
        Ok(())
    }

    async fn active_sale(&self, now: DateTime<Utc>) -> Result<Option<Sale>, StoreError> {
        let slots: Vec<Slot<Sale>> = self.sales.read().await.values().cloned().collect();
        let mut newest: Option<Sale> = None;
        for slot in slots {
            let sale = slot.lock().await;
            if sale.is_open_at(now)
                && newest
                    .as_ref()
                    .map_or(true, |current| sale.start_time > current.start_time)
            {
                newest = Some(sale.clone());
            }
        }
        Ok(newest)
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        match self.sale_slot(sale_id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn available_item(
        &self,
        item_id: ItemId,
        sale_id: SaleId,
    ) -> Result<Option<Item>, StoreError> {
        let slot = match self.items.read().await.get(&item_id).cloned() {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let item = slot.lock().await;
        if item.sale_id == sale_id && !item.is_sold {
            Ok(Some(item.clone()))
        } else {
            Ok(None)
        }
    }

    async fn purchase_count(&self, user_id: &str, sale_id: SaleId) -> Result<i32, StoreError> {
        let slot = self
            .counters
            .lock()
            .await
            .get(&(user_id.to_string(), sale_id))
            .cloned();
        match slot {
            Some(slot) => Ok(*slot.lock().await),
            None => Ok(0),
        }
    }

    async fn create_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.sale_slot(reservation.sale_id).await.is_none() {
            return Err(StoreError::Invalid(format!(
                "sale {} does not exist",
                reservation.sale_id
            )));
        }
        if !self.items.read().await.contains_key(&reservation.item_id) {
            return Err(StoreError::Invalid(format!(
                "item {} does not exist",
                reservation.item_id
            )));
        }

        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&reservation.token) {
            return Err(StoreError::Invalid("duplicate checkout code".to_string()));
        }
        reservations.insert(
            reservation.token.clone(),
            Arc::new(Mutex::new(reservation.clone())),
        );
        Ok(())
    }

    async fn reservation(&self, token: &str) -> Result<Option<Reservation>, StoreError> {
        let slot = self.reservations.read().await.get(token).cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AllocationError> {
        let item_slot = self
            .items
            .read()
            .await
            .get(&request.item_id)
            .cloned()
            .ok_or(AllocationError::ItemNotFound(request.item_id))?;
        let mut item = item_slot.lock().await;
        if item.sale_id != request.sale_id {
            return Err(AllocationError::ItemNotFound(request.item_id));
        }

        let reservation_slot = self
            .reservations
            .read()
            .await
            .get(&request.token)
            .cloned()
            .ok_or_else(|| StoreError::Invalid("unknown checkout code".to_string()))?;
        let mut reservation = reservation_slot.lock().await;
        if reservation.is_used {
            return Err(AllocationError::ReservationUsed);
        }
        if item.is_sold {
            return Err(AllocationError::ItemAlreadySold);
        }

        let sale_slot = self
            .sale_slot(request.sale_id)
            .await
            .ok_or(AllocationError::SaleNotActive)?;
        let mut sale = sale_slot.lock().await;
        if !sale.is_open_at(request.now) {
            return Err(AllocationError::SaleNotActive);
        }
        if sale.is_exhausted() {
            return Err(AllocationError::SaleLimitReached);
        }

        let counter_slot = self.counter_slot(&request.user_id, request.sale_id).await;
        let mut purchased = counter_slot.lock().await;
        if *purchased >= request.max_items_per_user {
            return Err(AllocationError::UserLimitReached);
        }

        let mut purchases = self.purchases.write().await;

        // No awaits past this point: the mutations below land together.
        let purchase = PurchaseRecord {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            item_id: item.id,
            sale_id: sale.id,
            checkout_code: request.token.clone(),
            purchased_at: request.now,
        };
        item.is_sold = true;
        sale.sold_items += 1;
        purchases.push(purchase.clone());
        *purchased += 1;
        reservation.is_used = true;

        Ok(Allocation {
            item: item.clone(),
            purchase,
        })
    }

    async fn purchases_for_user(
        &self,
        user_id: &str,
        sale_id: SaleId,
    ) -> Result<Vec<PurchaseRecord>, StoreError> {
        Ok(self
            .purchases
            .read()
            .await
            .iter()
            .filter(|p| p.user_id == user_id && p.sale_id == sale_id)
            .cloned()
            .collect())
    }
}
