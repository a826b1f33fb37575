//! The `Lot` aggregate: one auctionable item and its live auction state.
//!
//! A lot's lifecycle is strictly forward:
//!
//! ```text
//! draft / scheduled ──► active ──► { sold, unsold }
//!        (cancelled reachable from any pre-terminal state)
//! ```
//!
//! Terminal states are final — no bid and no sweep may mutate price, winner
//! or status afterwards.  The helpers below are the single place where those
//! transitions happen; [`BidLedger`](crate::bid_ledger::BidLedger),
//! [`AuctionCloser`](crate::auction_closer::AuctionCloser) and
//! [`OfferDesk`](crate::offer_desk::OfferDesk) all go through them.

use chrono::Duration;
use cg_common::{Amount, LotId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Draft,
    Scheduled,
    Active,
    Sold,
    Unsold,
    Cancelled,
}

impl LotStatus {
    /// Sold, unsold and cancelled lots never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, LotStatus::Sold | LotStatus::Unsold | LotStatus::Cancelled)
    }

    /// Forward-only edges of the status machine.
    pub fn can_advance_to(self, next: LotStatus) -> bool {
        use LotStatus::*;
        match (self, next) {
            (Draft, Scheduled) | (Draft, Active) | (Scheduled, Active) => true,
            (Active, Sold) | (Active, Unsold) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Raised when a caller tries to drive a lot against the status machine.
/// Under the store's version-CAS discipline this indicates a logic bug, not
/// a race.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal lot transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: LotStatus,
    pub to: LotStatus,
}

/// Anti-snipe parameters.  A bid landing inside `window` of the end pushes
/// `end_time` to `now + extension`; this applies on *every* qualifying bid,
/// so a contested lot can extend repeatedly.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionPolicy {
    pub window: Duration,
    pub extension: Duration,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(5),
            extension: Duration::minutes(10),
        }
    }
}

/// Outcome decision at closing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// At least one bid and the reserve was met.
    Sold,
    /// No bids, or the reserve was never reached.
    Unsold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub title: String,
    /// Manufacturer part number, carried onto the sales record.
    pub mpn: Option<String>,
    pub starting_price: Amount,
    pub current_price: Amount,
    pub reserve_price: Amount,
    pub reserve_met: bool,
    pub bid_increment: Amount,
    pub bid_count: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub original_end_time: Timestamp,
    pub extended: bool,
    pub extension_count: u32,
    pub winning_bidder_id: Option<UserId>,
    pub winning_bidder_name: Option<String>,
    pub last_bid_time: Option<Timestamp>,
    pub status: LotStatus,
    pub sold_at: Option<Timestamp>,
    pub sold_to: Option<UserId>,
    pub sold_price: Option<Amount>,
    pub allow_offers: bool,
    pub minimum_offer: Option<Amount>,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    /// All read-decide-write sequences on a lot are serialized through it.
    pub version: u64,
}

impl Lot {
    /// Build an already-active lot.  Admin draft/scheduling flows live in the
    /// catalogue service; the core only ever sees lots from `active` onward.
    pub fn open(
        title: impl Into<String>,
        starting_price: Amount,
        reserve_price: Amount,
        bid_increment: Amount,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Self {
        Self {
            id: LotId::new(),
            title: title.into(),
            mpn: None,
            starting_price,
            current_price: starting_price,
            reserve_price,
            reserve_met: false,
            bid_increment,
            bid_count: 0,
            start_time,
            end_time,
            original_end_time: end_time,
            extended: false,
            extension_count: 0,
            winning_bidder_id: None,
            winning_bidder_name: None,
            last_bid_time: None,
            status: LotStatus::Active,
            sold_at: None,
            sold_to: None,
            sold_price: None,
            allow_offers: false,
            minimum_offer: None,
            version: 0,
        }
    }

    /// Smallest amount the next bid may carry.
    pub fn minimum_bid(&self) -> Amount {
        self.current_price + self.bid_increment
    }

    /// Whether the auction window is open at `now`.
    pub fn is_open_for_bids(&self, now: Timestamp) -> bool {
        self.status == LotStatus::Active && now < self.end_time
    }

    /// Whether the closing sweep should settle this lot at `now`.
    pub fn is_due_for_close(&self, now: Timestamp) -> bool {
        self.status == LotStatus::Active && self.end_time <= now
    }

    /// Apply an accepted bid to the aggregate.  Preconditions (status, end
    /// time, self-outbid, minimum increment) must already have been checked
    /// against this exact snapshot; the store's version CAS guarantees no
    /// other write slipped in between.
    ///
    /// Returns `true` when the anti-snipe extension fired.
    pub fn register_bid(
        &mut self,
        bidder: UserId,
        bidder_name: Option<String>,
        amount: Amount,
        now: Timestamp,
        policy: ExtensionPolicy,
    ) -> bool {
        debug_assert!(self.is_open_for_bids(now));
        debug_assert!(amount >= self.minimum_bid());

        self.current_price = amount;
        self.bid_count += 1;
        self.winning_bidder_id = Some(bidder);
        self.winning_bidder_name = bidder_name;
        self.last_bid_time = Some(now);

        // Sticky: once met, never cleared.
        if amount >= self.reserve_price {
            self.reserve_met = true;
        }

        let remaining = self.end_time - now;
        let extend = remaining < policy.window && remaining > Duration::zero();
        if extend {
            // end_time only ever moves forward: now + extension is always
            // later than the old end time because remaining < window <= extension.
            self.end_time = now + policy.extension;
            self.extended = true;
            self.extension_count += 1;
        }
        extend
    }

    /// Decide the closing outcome for this lot.
    pub fn close_outcome(&self) -> CloseOutcome {
        if self.bid_count > 0 && self.reserve_met {
            CloseOutcome::Sold
        } else {
            CloseOutcome::Unsold
        }
    }

    /// Transition to `sold`, recording the buyer and price.  Used both by the
    /// closing sweep (buyer = winning bidder, price = current price) and by
    /// offer acceptance (buyer = offerer, price = offer amount).
    pub fn mark_sold(
        &mut self,
        buyer: UserId,
        price: Amount,
        now: Timestamp,
    ) -> Result<(), IllegalTransition> {
        self.advance(LotStatus::Sold)?;
        self.sold_at = Some(now);
        self.sold_to = Some(buyer);
        self.sold_price = Some(price);
        Ok(())
    }

    /// Transition to `unsold`.
    pub fn mark_unsold(&mut self) -> Result<(), IllegalTransition> {
        self.advance(LotStatus::Unsold)
    }

    fn advance(&mut self, next: LotStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn lot_ending_in(minutes: i64) -> Lot {
        let now = Utc::now();
        Lot::open(
            "10k 0603 resistors",
            dec!(50),
            dec!(100),
            dec!(5),
            now - Duration::hours(1),
            now + Duration::minutes(minutes),
        )
    }

    #[test]
    fn status_machine_is_forward_only() {
        assert!(LotStatus::Active.can_advance_to(LotStatus::Sold));
        assert!(LotStatus::Scheduled.can_advance_to(LotStatus::Active));
        assert!(LotStatus::Active.can_advance_to(LotStatus::Cancelled));
        assert!(!LotStatus::Sold.can_advance_to(LotStatus::Active));
        assert!(!LotStatus::Sold.can_advance_to(LotStatus::Cancelled));
        assert!(!LotStatus::Unsold.can_advance_to(LotStatus::Sold));
    }

    #[test]
    fn register_bid_updates_price_and_winner() {
        let mut lot = lot_ending_in(60);
        let bidder = UserId::new();
        let now = Utc::now();

        let extended = lot.register_bid(bidder, None, dec!(55), now, ExtensionPolicy::default());

        assert!(!extended, "a bid an hour out must not extend");
        assert_eq!(lot.current_price, dec!(55));
        assert_eq!(lot.bid_count, 1);
        assert_eq!(lot.winning_bidder_id, Some(bidder));
        assert_eq!(lot.last_bid_time, Some(now));
        assert!(!lot.reserve_met);
    }

    #[test]
    fn reserve_flag_is_sticky() {
        let mut lot = lot_ending_in(60);
        let now = Utc::now();
        lot.register_bid(UserId::new(), None, dec!(120), now, ExtensionPolicy::default());
        assert!(lot.reserve_met);

        // A later (higher) bid below reserve cannot happen, but even a direct
        // re-application never clears the flag.
        lot.register_bid(UserId::new(), None, dec!(130), now, ExtensionPolicy::default());
        assert!(lot.reserve_met);
    }

    #[test]
    fn late_bid_extends_end_time() {
        let mut lot = lot_ending_in(2);
        let now = Utc::now();
        let old_end = lot.end_time;

        let extended = lot.register_bid(UserId::new(), None, dec!(55), now, ExtensionPolicy::default());

        assert!(extended);
        assert!(lot.extended);
        assert_eq!(lot.extension_count, 1);
        assert!(lot.end_time > old_end);
        assert_eq!(lot.end_time, now + Duration::minutes(10));
        assert_eq!(lot.original_end_time, old_end);
    }

    #[test]
    fn close_outcome_requires_bids_and_reserve() {
        let mut lot = lot_ending_in(60);
        assert_eq!(lot.close_outcome(), CloseOutcome::Unsold);

        let now = Utc::now();
        lot.register_bid(UserId::new(), None, dec!(60), now, ExtensionPolicy::default());
        assert_eq!(lot.close_outcome(), CloseOutcome::Unsold, "reserve not met");

        lot.register_bid(UserId::new(), None, dec!(120), now, ExtensionPolicy::default());
        assert_eq!(lot.close_outcome(), CloseOutcome::Sold);
    }

    #[test]
    fn terminal_lot_rejects_further_transitions() {
        let mut lot = lot_ending_in(0);
        lot.mark_unsold().unwrap();
        let err = lot.mark_sold(UserId::new(), dec!(1), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            IllegalTransition {
                from: LotStatus::Unsold,
                to: LotStatus::Sold
            }
        );
    }
}
