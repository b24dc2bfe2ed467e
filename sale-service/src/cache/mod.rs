//! Best-effort reservation cache and the lookup layer that keeps the
//! durable store authoritative.

mod memory;
mod redis_cache;

pub use memory::MemoryReservationCache;
pub use redis_cache::RedisReservationCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::Reservation;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{SaleStore, StoreError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait ReservationCache: Send + Sync {
    async fn put(&self, reservation: &Reservation, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, token: &str) -> Result<Option<Reservation>, CacheError>;

    async fn remove(&self, token: &str) -> Result<(), CacheError>;
}

/// Read-through, write-around access to reservations.
///
/// A cache hit is trusted only for the reservation's content. A miss or a
/// cache failure always falls through to the store, so losing cache entries
/// never fails a legitimate purchase. Writes and deletes never surface
/// cache errors.
#[derive(Clone)]
pub struct ReservationLookup {
    store: Arc<dyn SaleStore>,
    cache: Arc<dyn ReservationCache>,
}

impl ReservationLookup {
    pub fn new(store: Arc<dyn SaleStore>, cache: Arc<dyn ReservationCache>) -> Self {
        Self { store, cache }
    }

    pub async fn resolve(&self, token: &str) -> Result<Option<Reservation>, StoreError> {
        match self.cache.get(token).await {
            Ok(Some(reservation)) => return Ok(Some(reservation)),
            Ok(None) => debug!("Code {} not found in cache, checking store", token),
            Err(e) => warn!("Cache lookup for code {} failed: {}. Falling back to store", token, e),
        }

        self.store.reservation(token).await
    }

    pub async fn mirror(&self, reservation: &Reservation, ttl: Duration) {
        if let Err(e) = self.cache.put(reservation, ttl).await {
            warn!("Failed to store checkout code {} in cache: {}", reservation.token, e);
        }
    }

    pub async fn evict(&self, token: &str) {
        if let Err(e) = self.cache.remove(token).await {
            warn!("Failed to delete checkout code {} from cache: {}", token, e);
        }
    }
}
