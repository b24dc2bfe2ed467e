use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use shared::Reservation;

use super::{CacheError, ReservationCache};

/// Reservations mirrored into Redis as JSON under `checkout_code:{token}`.
#[derive(Clone)]
pub struct RedisReservationCache {
    conn_manager: ConnectionManager,
}

impl RedisReservationCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }

    fn key(token: &str) -> String {
        format!("checkout_code:{}", token)
    }
}

#[async_trait]
impl ReservationCache for RedisReservationCache {
    async fn put(&self, reservation: &Reservation, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let payload = serde_json::to_string(reservation)?;
        // SET EX rejects zero; a sub-second window still gets one second.
        let ttl_seconds = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(Self::key(&reservation.token), payload, ttl_seconds)
            .await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Reservation>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let payload: Option<String> = conn.get(Self::key(token)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(Self::key(token)).await?;
        Ok(())
    }
}
