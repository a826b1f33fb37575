//! Storage abstraction for the auction core.
//!
//! Can be backed by Postgres, SQLite, etc.; out of the box we provide an
//! in-memory implementation that is perfect for unit tests and local dev
//! environments ([`memory::MemoryAuctionStore`]).
//!
//! Two design points matter more than the CRUD surface:
//!
//! 1. **Per-lot serialization.** Every lot carries a `version` counter.  The
//!    two transactional operations ([`AuctionStore::commit_bid`] and
//!    [`AuctionStore::settle_lot`]) take the version the caller read and fail
//!    with [`StoreError::VersionConflict`] when it no longer matches.  That
//!    compare-and-swap is the critical section: two bidders racing on the
//!    same lot, or a bid racing the closing sweep, are serialized here and
//!    the loser re-reads and re-validates.
//!
//! 2. **Atomic write pairs.** The lot mutation plus its bid-row changes are
//!    one store operation, never two.  A SQL implementation runs each as a
//!    single transaction; the memory store applies them under one lock.
//!    This is what keeps `current_price` and the winning bid row from ever
//!    disagreeing, even under partial failure.

pub mod memory;

pub use memory::MemoryAuctionStore;

use async_trait::async_trait;
use cg_common::{Amount, LotId, OfferId, Timestamp, UserId};
use chrono::Duration;
use thiserror::Error;

use crate::domain::{Bid, Lot, Notification, Offer, SalesRecord, UserStats, WatchEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The lot changed since the caller's snapshot; re-read and re-validate.
    #[error("write conflict on lot {0}: version changed")]
    VersionConflict(LotId),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure (connection loss, constraint violation, ...).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// How `settle_lot` should finalize the lot's bid rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidSettlement {
    /// The currently-winning bid goes to `won`, every other non-terminal bid
    /// to `lost`. Used when the sweep settles a sold lot.
    AuctionWin,
    /// Every non-terminal bid goes to `lost`. Used for unsold lots and for
    /// offer acceptance (the bid chain lost to the offer).
    AllLost,
}

#[async_trait]
pub trait AuctionStore: Send + Sync + 'static {
    // ------------------------------------------------------------------
    // Lots
    // ------------------------------------------------------------------

    async fn insert_lot(&self, lot: Lot) -> Result<(), StoreError>;

    async fn lot(&self, id: LotId) -> Result<Option<Lot>, StoreError>;

    /// Snapshot of active lots whose end time has passed. Candidates only:
    /// each must be re-validated under the version CAS before settlement,
    /// because a bid may extend it between the select and the write.
    async fn expired_active_lots(&self, now: Timestamp) -> Result<Vec<LotId>, StoreError>;

    /// Active lots ending inside `(now, now + horizon]`.
    async fn lots_ending_within(
        &self,
        now: Timestamp,
        horizon: Duration,
    ) -> Result<Vec<Lot>, StoreError>;

    // ------------------------------------------------------------------
    // Transactional operations (per-lot critical sections)
    // ------------------------------------------------------------------

    /// Atomically: CAS the mutated lot against `expected_version`, demote the
    /// previous winning bid to `outbid`, insert the new winning bid.
    ///
    /// Returns the stored lot and the bid that was outbid, if any.
    async fn commit_bid(
        &self,
        lot: Lot,
        expected_version: u64,
        bid: Bid,
    ) -> Result<(Lot, Option<Bid>), StoreError>;

    /// Atomically: CAS the terminal lot against `expected_version`, settle
    /// its bid rows per `settlement` (no-op for already-terminal bids), and
    /// insert the sale receipt when one is due.
    async fn settle_lot(
        &self,
        lot: Lot,
        expected_version: u64,
        settlement: BidSettlement,
        sale: Option<SalesRecord>,
    ) -> Result<Lot, StoreError>;

    // ------------------------------------------------------------------
    // Bids
    // ------------------------------------------------------------------

    async fn bids_for_lot(&self, lot_id: LotId) -> Result<Vec<Bid>, StoreError>;

    /// Distinct users holding a non-terminal bid on the lot.
    async fn active_bidders(&self, lot_id: LotId) -> Result<Vec<UserId>, StoreError>;

    // ------------------------------------------------------------------
    // Offers
    // ------------------------------------------------------------------

    async fn insert_offer(&self, offer: Offer) -> Result<(), StoreError>;

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>, StoreError>;

    async fn update_offer(&self, offer: Offer) -> Result<(), StoreError>;

    async fn pending_offer_for(
        &self,
        lot_id: LotId,
        user_id: UserId,
    ) -> Result<Option<Offer>, StoreError>;

    /// Flip every other pending offer on the lot to `rejected`; returns the
    /// offers that were flipped so callers can notify their owners.
    async fn reject_other_pending_offers(
        &self,
        lot_id: LotId,
        except: OfferId,
    ) -> Result<Vec<Offer>, StoreError>;

    // ------------------------------------------------------------------
    // Sales, notifications, watchlist
    // ------------------------------------------------------------------

    async fn sale_for_lot(&self, lot_id: LotId) -> Result<Option<SalesRecord>, StoreError>;

    async fn insert_notification(&self, n: Notification) -> Result<(), StoreError>;

    /// Insert unless a row with the same (user, lot, kind) already exists.
    /// Returns whether a row was inserted. This is what makes the
    /// ending-soon notice once-per-lot for bidders.
    async fn insert_notification_if_absent(&self, n: Notification) -> Result<bool, StoreError>;

    async fn notifications_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError>;

    async fn insert_watch(&self, entry: WatchEntry) -> Result<(), StoreError>;

    /// Watchers who opted into the ending notice and have not received it.
    async fn watchers_pending_ending_notice(&self, lot_id: LotId) -> Result<Vec<UserId>, StoreError>;

    /// Set the `notified_ending` flag for the lot's opted-in watchers.
    async fn mark_watchers_notified(&self, lot_id: LotId) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // User stats (best-effort counters, not invariants)
    // ------------------------------------------------------------------

    async fn record_bid_placed(&self, user_id: UserId) -> Result<(), StoreError>;

    async fn record_win(&self, user_id: UserId, amount: Amount) -> Result<(), StoreError>;

    async fn user_stats(&self, user_id: UserId) -> Result<UserStats, StoreError>;
}
