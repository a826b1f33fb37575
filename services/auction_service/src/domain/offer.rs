//! Out-of-band purchase proposals, independent of the bid chain.
//!
//! Accepting an offer is an alternate path to the same terminal "lot sold"
//! state the closing sweep reaches, and goes through the same per-lot
//! serialization in the store.

use cg_common::{Amount, LotId, OfferId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub lot_id: LotId,
    pub user_id: UserId,
    pub lot_title: Option<String>,
    pub user_name: Option<String>,
    pub amount: Amount,
    pub message: Option<String>,
    pub status: OfferStatus,
    pub admin_response: Option<String>,
    pub responded_by: Option<UserId>,
    pub responded_at: Option<Timestamp>,
    pub counter_amount: Option<Amount>,
    pub created_at: Timestamp,
}

impl Offer {
    pub fn pending(
        lot_id: LotId,
        user_id: UserId,
        lot_title: Option<String>,
        user_name: Option<String>,
        amount: Amount,
        message: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: OfferId::new(),
            lot_id,
            user_id,
            lot_title,
            user_name,
            amount,
            message,
            status: OfferStatus::Pending,
            admin_response: None,
            responded_by: None,
            responded_at: None,
            counter_amount: None,
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }

    fn respond(&mut self, status: OfferStatus, admin: UserId, response: Option<String>, now: Timestamp) {
        self.status = status;
        self.responded_by = Some(admin);
        self.responded_at = Some(now);
        self.admin_response = response;
    }

    pub fn accept(&mut self, admin: UserId, response: Option<String>, now: Timestamp) {
        self.respond(OfferStatus::Accepted, admin, response, now);
    }

    pub fn reject(&mut self, admin: UserId, response: Option<String>, now: Timestamp) {
        self.respond(OfferStatus::Rejected, admin, response, now);
    }

    pub fn counter(&mut self, admin: UserId, amount: Amount, response: Option<String>, now: Timestamp) {
        self.respond(OfferStatus::Countered, admin, response, now);
        self.counter_amount = Some(amount);
    }

    pub fn withdraw(&mut self) {
        self.status = OfferStatus::Withdrawn;
    }
}
