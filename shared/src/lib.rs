use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub type SaleId = i64;
pub type ItemId = i64;

/// One flash-sale cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_items: i32,
    pub sold_items: i32,
    pub is_active: bool,
}

impl Sale {
    /// Purchasable at `now`: flagged active and `now` inside `[start, end)`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_time <= now && now < self.end_time
    }

    pub fn is_exhausted(&self) -> bool {
        self.sold_items >= self.total_items
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub sale_id: SaleId,
    pub name: String,
    pub image_url: String,
    pub is_sold: bool,
}

/// A time-boxed claim on one item, identified by its checkout code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub token: String,
    pub user_id: String,
    pub item_id: ItemId,
    pub sale_id: SaleId,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: ItemId,
    pub sale_id: SaleId,
    pub checkout_code: String,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSaleCounter {
    pub user_id: String,
    pub sale_id: SaleId,
    pub items_purchased: i32,
}

/// The named values fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleSettings {
    pub sale_duration: Duration,
    pub cycle_period: Duration,
    pub reservation_ttl: Duration,
    pub items_per_sale: i32,
    pub max_items_per_user: i32,
}

impl Default for SaleSettings {
    fn default() -> Self {
        Self {
            sale_duration: Duration::from_secs(60 * 60),
            cycle_period: Duration::from_secs(60 * 60),
            reservation_ttl: Duration::from_secs(5 * 60),
            items_per_sale: 10_000,
            max_items_per_user: 10,
        }
    }
}

impl SaleSettings {
    pub fn sale_span(&self) -> chrono::Duration {
        to_chrono(self.sale_duration)
    }

    pub fn reservation_span(&self) -> chrono::Duration {
        to_chrono(self.reservation_ttl)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    // Only overflows for spans of millions of years.
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 1000))
}

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Admission or allocation contention; retry later or with other parameters.
    TryLater,
    /// The checkout code can never succeed; checkout again.
    TokenDead,
    /// Infrastructure failure.
    SystemProblem,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("no active sale at the moment")]
    SaleNotActive,
    #[error("item not found, not part of active sale, or already sold")]
    ItemUnavailable,
    #[error("user has reached the purchase limit for this sale")]
    UserLimitReached,
    #[error("checkout processing failed")]
    ReservationFailed,
}

impl CheckoutError {
    pub fn outcome(&self) -> Outcome {
        match self {
            CheckoutError::SaleNotActive
            | CheckoutError::ItemUnavailable
            | CheckoutError::UserLimitReached => Outcome::TryLater,
            CheckoutError::ReservationFailed => Outcome::SystemProblem,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("checkout code is invalid")]
    TokenInvalid,
    #[error("checkout code has already been used")]
    TokenAlreadyUsed,
    #[error("checkout code has expired")]
    TokenExpired,
    #[error("no active sale at the moment")]
    SaleNotActive,
    #[error("item is no longer available or already sold")]
    ItemAlreadySold,
    #[error("sale item limit reached")]
    SaleLimitReached,
    #[error("user has reached the purchase limit for this sale")]
    UserLimitReached,
    #[error("purchase failed")]
    PurchaseFailed,
}

impl PurchaseError {
    pub fn outcome(&self) -> Outcome {
        match self {
            PurchaseError::TokenInvalid
            | PurchaseError::TokenAlreadyUsed
            | PurchaseError::TokenExpired => Outcome::TokenDead,
            PurchaseError::SaleNotActive
            | PurchaseError::ItemAlreadySold
            | PurchaseError::SaleLimitReached
            | PurchaseError::UserLimitReached => Outcome::TryLater,
            PurchaseError::PurchaseFailed => Outcome::SystemProblem,
        }
    }
}
