//! Internal event bus.
//!
//! The ledger, closer and offer desk publish here after their critical
//! section commits; the delivery worker (and any future websocket fan-out)
//! subscribes.  A slow or failing consumer can never block or fail a bid or
//! a close — lagging receivers simply drop old events.

use cg_common::{Amount, LotId, OfferId, SaleId, Timestamp, UserId};
use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    BidPlaced {
        lot_id: LotId,
        bidder_id: UserId,
        amount: Amount,
        previous_bidder: Option<UserId>,
        extended: bool,
        end_time: Timestamp,
    },
    LotSold {
        lot_id: LotId,
        winner: UserId,
        price: Amount,
        sale_id: SaleId,
    },
    LotUnsold {
        lot_id: LotId,
    },
    EndingSoon {
        lot_id: LotId,
        end_time: Timestamp,
    },
    OfferReceived {
        lot_id: LotId,
        offer_id: OfferId,
        user_id: UserId,
        amount: Amount,
    },
    OfferAccepted {
        lot_id: LotId,
        offer_id: OfferId,
        buyer: UserId,
        amount: Amount,
    },
}

/// Cheaply clonable handle to the bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuctionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. An error only means nobody is subscribed,
    /// which is fine — events are advisory.
    pub fn publish(&self, event: AuctionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
