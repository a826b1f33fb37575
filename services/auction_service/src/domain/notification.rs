//! Fire-and-forget notification rows.
//!
//! Not a correctness boundary: delivery (email/push) belongs to the sink.
//! The core only guarantees each row is generated exactly once per
//! triggering condition, which the constructors below make uniform.

use cg_common::{Amount, LotId, NotificationId, OfferId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Outbid,
    Won,
    EndingSoon,
    OfferAccepted,
    OfferRejected,
    OfferCountered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub lot_id: Option<LotId>,
    pub offer_id: Option<OfferId>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    fn new(
        user_id: UserId,
        lot_id: Option<LotId>,
        offer_id: Option<OfferId>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: String,
        action_url: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            lot_id,
            offer_id,
            kind,
            title: title.into(),
            message,
            action_url,
            read: false,
            created_at: now,
        }
    }

    pub fn outbid(user_id: UserId, lot_id: LotId, lot_title: &str, now: Timestamp) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            None,
            NotificationKind::Outbid,
            "You've been outbid",
            format!("Someone placed a higher bid on \"{lot_title}\""),
            Some(format!("/lots/{lot_id}")),
            now,
        )
    }

    pub fn won(user_id: UserId, lot_id: LotId, lot_title: &str, price: Amount, now: Timestamp) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            None,
            NotificationKind::Won,
            "You Won!",
            format!("Congratulations! You won \"{lot_title}\" for ${price}"),
            Some(format!("/won/{lot_id}")),
            now,
        )
    }

    pub fn ending_soon(user_id: UserId, lot_id: LotId, lot_title: &str, now: Timestamp) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            None,
            NotificationKind::EndingSoon,
            "Auction Ending Soon",
            format!("\"{lot_title}\" is ending in less than 10 minutes!"),
            Some(format!("/lots/{lot_id}")),
            now,
        )
    }

    pub fn offer_accepted(
        user_id: UserId,
        lot_id: LotId,
        offer_id: OfferId,
        lot_title: &str,
        amount: Amount,
        now: Timestamp,
    ) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            Some(offer_id),
            NotificationKind::OfferAccepted,
            "Offer Accepted",
            format!("Your offer of ${amount} on \"{lot_title}\" has been accepted"),
            Some(format!("/won/{lot_id}")),
            now,
        )
    }

    pub fn offer_rejected(
        user_id: UserId,
        lot_id: LotId,
        offer_id: OfferId,
        lot_title: &str,
        now: Timestamp,
    ) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            Some(offer_id),
            NotificationKind::OfferRejected,
            "Offer Declined",
            format!("Your offer on \"{lot_title}\" was declined"),
            Some(format!("/lots/{lot_id}")),
            now,
        )
    }

    pub fn offer_countered(
        user_id: UserId,
        lot_id: LotId,
        offer_id: OfferId,
        lot_title: &str,
        counter: Amount,
        now: Timestamp,
    ) -> Self {
        Self::new(
            user_id,
            Some(lot_id),
            Some(offer_id),
            NotificationKind::OfferCountered,
            "Counter Offer",
            format!("The seller countered your offer on \"{lot_title}\" at ${counter}"),
            Some(format!("/lots/{lot_id}")),
            now,
        )
    }
}
