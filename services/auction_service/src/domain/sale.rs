//! The durable sale receipt, created exactly once per sold lot.
//!
//! Its existence is the external proof that settlement ran; payment and
//! shipping progress are tracked by the fulfilment tooling afterwards.

use cg_common::{Amount, LotId, SaleId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    AuctionWin,
    OfferAccepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Pending,
    Shipped,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesRecord {
    pub id: SaleId,
    pub lot_id: LotId,
    pub user_id: UserId,
    pub sale_type: SaleType,
    pub sale_price: Amount,
    pub lot_title: String,
    pub lot_mpn: Option<String>,
    pub user_name: Option<String>,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
    pub created_at: Timestamp,
}

impl SalesRecord {
    /// A fresh receipt with payment and shipping both pending.
    pub fn new(
        lot_id: LotId,
        user_id: UserId,
        sale_type: SaleType,
        sale_price: Amount,
        lot_title: impl Into<String>,
        lot_mpn: Option<String>,
        user_name: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: SaleId::new(),
            lot_id,
            user_id,
            sale_type,
            sale_price,
            lot_title: lot_title.into(),
            lot_mpn,
            user_name,
            payment_status: PaymentStatus::Pending,
            shipping_status: ShippingStatus::Pending,
            created_at: now,
        }
    }
}
