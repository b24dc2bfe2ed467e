use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use shared::Reservation;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheError, ReservationCache};

/// Process-local cache with per-entry expiry, used when running without Redis.
#[derive(Default)]
pub struct MemoryReservationCache {
    entries: RwLock<HashMap<String, (Reservation, Instant)>>,
}

impl MemoryReservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn live_entries(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

#[async_trait]
impl ReservationCache for MemoryReservationCache {
    async fn put(&self, reservation: &Reservation, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Expired entries are swept on every write.
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(reservation.token.clone(), (reservation.clone(), now + ttl));
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Reservation>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(token) {
                Some((reservation, expires)) if *expires > now => {
                    return Ok(Some(reservation.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        self.entries.write().await.remove(token);
        Ok(None)
    }

    async fn remove(&self, token: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reservation(token: &str) -> Reservation {
        let now = Utc::now();
        Reservation {
            token: token.to_string(),
            user_id: "u1".to_string(),
            item_id: 1,
            sale_id: 1,
            expires_at: now + chrono::Duration::minutes(5),
            is_used: false,
            created_at: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = MemoryReservationCache::new();
        cache.put(&reservation("a"), Duration::from_secs(300)).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("a").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("a").await.unwrap().is_none());
        assert_eq!(cache.live_entries().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_sweeps_expired_entries() {
        let cache = MemoryReservationCache::new();
        for n in 0..1000 {
            cache
                .put(&reservation(&format!("old-{n}")), Duration::from_secs(300))
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        for n in 0..10 {
            cache
                .put(&reservation(&format!("new-{n}")), Duration::from_secs(300))
                .await
                .unwrap();
        }

        assert_eq!(cache.live_entries().await, 10);
        assert_eq!(cache.entries.read().await.len(), 10);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = MemoryReservationCache::new();
        let mut first = reservation("a");
        cache.put(&first, Duration::from_secs(60)).await.unwrap();
        first.is_used = true;
        cache.put(&first, Duration::from_secs(60)).await.unwrap();

        assert!(cache.get("a").await.unwrap().unwrap().is_used);
        cache.remove("a").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
    }
}
