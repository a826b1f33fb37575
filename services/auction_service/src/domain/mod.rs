//! Domain aggregates for the auction core.
//!
//! The interesting invariants live on [`Lot`] (monotonic price, forward-only
//! status machine, anti-snipe extension) and [`Bid`] (single winner,
//! idempotent terminal settlement).  Everything here is plain data plus
//! transition helpers; persistence and concurrency are the store's problem.

pub mod bid;
pub mod lot;
pub mod notification;
pub mod offer;
pub mod sale;

pub use bid::{Bid, BidStatus};
pub use lot::{CloseOutcome, ExtensionPolicy, Lot, LotStatus};
pub use notification::{Notification, NotificationKind};
pub use offer::{Offer, OfferStatus};
pub use sale::{PaymentStatus, SaleType, SalesRecord, ShippingStatus};

use cg_common::{Amount, LotId, UserId};
use serde::{Deserialize, Serialize};

/// An already-authenticated caller identity, resolved by the auth
/// collaborator before the core is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidderIdentity {
    pub id: UserId,
    pub display_name: Option<String>,
}

impl BidderIdentity {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
        }
    }

    pub fn named(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: Some(name.into()),
        }
    }
}

/// Request-level metadata recorded alongside a bid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A user watching a lot. `notified_ending` is set exactly once so the
/// ending-soon sweep cannot spam watchers on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEntry {
    pub user_id: UserId,
    pub lot_id: LotId,
    pub notify_on_ending: bool,
    pub notified_ending: bool,
}

impl WatchEntry {
    pub fn new(user_id: UserId, lot_id: LotId) -> Self {
        Self {
            user_id,
            lot_id,
            notify_on_ending: true,
            notified_ending: false,
        }
    }
}

/// Best-effort lifetime counters on the user aggregate. The core increments
/// them and never reads them back to make decisions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub total_bids: u64,
    pub total_wins: u64,
    pub total_spent: Amount,
}
