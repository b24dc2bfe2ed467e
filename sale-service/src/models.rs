use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Item, PurchaseRecord, Reservation, Sale};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::sales)]
pub struct SaleRow {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_items: i32,
    pub sold_items: i32,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::sales)]
pub struct NewSale {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_items: i32,
    pub sold_items: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::items)]
pub struct ItemRow {
    pub id: i64,
    pub sale_id: i64,
    pub name: String,
    pub image_url: String,
    pub is_sold: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = crate::schema::items)]
pub struct NewItem {
    pub sale_id: i64,
    pub name: String,
    pub image_url: String,
    pub is_sold: bool,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::checkout_attempts)]
pub struct CheckoutAttempt {
    pub id: String,
    pub user_id: String,
    pub item_id: i64,
    pub sale_id: i64,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::purchases)]
pub struct PurchaseRow {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: i64,
    pub sale_id: i64,
    pub checkout_code: String,
    pub purchased_at: DateTime<Utc>,
}

impl From<SaleRow> for Sale {
    fn from(row: SaleRow) -> Self {
        Self {
            id: row.id,
            start_time: row.start_time,
            end_time: row.end_time,
            total_items: row.total_items,
            sold_items: row.sold_items,
            is_active: row.is_active,
        }
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            sale_id: row.sale_id,
            name: row.name,
            image_url: row.image_url,
            is_sold: row.is_sold,
        }
    }
}

impl From<CheckoutAttempt> for Reservation {
    fn from(attempt: CheckoutAttempt) -> Self {
        Self {
            token: attempt.id,
            user_id: attempt.user_id,
            item_id: attempt.item_id,
            sale_id: attempt.sale_id,
            expires_at: attempt.expires_at,
            is_used: attempt.is_used,
            created_at: attempt.created_at,
        }
    }
}

impl From<&Reservation> for CheckoutAttempt {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.token.clone(),
            user_id: reservation.user_id.clone(),
            item_id: reservation.item_id,
            sale_id: reservation.sale_id,
            expires_at: reservation.expires_at,
            is_used: reservation.is_used,
            created_at: reservation.created_at,
        }
    }
}

impl From<PurchaseRow> for PurchaseRecord {
    fn from(row: PurchaseRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            item_id: row.item_id,
            sale_id: row.sale_id,
            checkout_code: row.checkout_code,
            purchased_at: row.purchased_at,
        }
    }
}

impl From<&PurchaseRecord> for PurchaseRow {
    fn from(record: &PurchaseRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id.clone(),
            item_id: record.item_id,
            sale_id: record.sale_id,
            checkout_code: record.checkout_code.clone(),
            purchased_at: record.purchased_at,
        }
    }
}
