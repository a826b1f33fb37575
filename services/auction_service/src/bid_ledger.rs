//! Bid acceptance.
//!
//! [`BidLedger::place_bid`] is the only way a bid enters the system.  It
//! runs the ordered precondition checks against one consistent snapshot of
//! the lot, applies the mutation through the store's version CAS, and
//! retries internally on write conflicts.  Two bidders racing on the same
//! lot are therefore serialized by commit order: the loser of the race is
//! re-validated against the new price and, when too low, rejected with
//! `BID_TOO_LOW` — never silently interleaved.
//!
//! Side effects after the commit (outbid notification, stats counter,
//! event publish) are best-effort: a failing notification sink must not
//! fail an accepted bid.

use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use cg_common::{Amount, LotId};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::domain::{Bid, BidderIdentity, ExtensionPolicy, Lot, LotStatus, Notification, RequestMeta};
use crate::error::{AuctionError, Result};
use crate::events::{AuctionEvent, EventBus};
use crate::store::{AuctionStore, StoreError};

/// Tunables for the ledger's critical section.
#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    pub extension: ExtensionPolicy,
    /// How many CAS conflicts to absorb before surfacing a transient error.
    pub write_retry_limit: u32,
    /// Upper bound for a single store operation.
    pub store_op_timeout: StdDuration,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            extension: ExtensionPolicy::default(),
            write_retry_limit: 4,
            store_op_timeout: StdDuration::from_secs(3),
        }
    }
}

/// Successful bid placement: the new bid, the lot as stored, and a
/// non-fatal warning when the bid was accepted below the reserve.
#[derive(Debug, Clone, Serialize)]
pub struct BidAccepted {
    pub bid: Bid,
    pub lot: Lot,
    pub reserve_warning: Option<String>,
}

pub struct BidLedger<S: AuctionStore> {
    store: Arc<S>,
    bus: EventBus,
    policy: LedgerPolicy,
}

impl<S: AuctionStore> BidLedger<S> {
    pub fn new(store: Arc<S>, bus: EventBus, policy: LedgerPolicy) -> Self {
        Self { store, bus, policy }
    }

    /// Accept or reject a single bid attempt.
    ///
    /// Precondition failures are terminal for the attempt and carry a stable
    /// code; CAS conflicts are retried internally up to the policy bound.
    #[instrument(skip(self, bidder, meta), fields(lot_id = %lot_id, bidder_id = %bidder.id, %amount))]
    pub async fn place_bid(
        &self,
        lot_id: LotId,
        bidder: &BidderIdentity,
        amount: Amount,
        meta: RequestMeta,
    ) -> Result<BidAccepted> {
        // Payload validation, ahead of any store read.
        if amount <= Decimal::ZERO {
            return Err(AuctionError::BidAmountRequired);
        }

        for attempt in 0..=self.policy.write_retry_limit {
            let lot = self
                .store_op(self.store.lot(lot_id))
                .await?
                .ok_or(AuctionError::LotNotFound(lot_id))?;

            let now = Utc::now();
            Self::check_preconditions(&lot, bidder, amount, now)?;

            let snapshot_version = lot.version;
            let mut updated = lot;
            let extended = updated.register_bid(
                bidder.id,
                bidder.display_name.clone(),
                amount,
                now,
                self.policy.extension,
            );
            let bid = Bid::winning(
                lot_id,
                bidder.id,
                bidder.display_name.clone(),
                amount,
                &meta,
                now,
            );

            match self
                .store_op(self.store.commit_bid(updated, snapshot_version, bid.clone()))
                .await
            {
                Ok((stored, outbid)) => {
                    self.after_commit(&stored, &bid, outbid, extended).await;
                    let reserve_warning = (!stored.reserve_met)
                        .then(|| "Bid is below reserve price".to_string());
                    return Ok(BidAccepted {
                        bid,
                        lot: stored,
                        reserve_warning,
                    });
                }
                Err(AuctionError::Store(StoreError::VersionConflict(_))) => {
                    // Someone else entered the critical section first;
                    // re-read and re-validate against the new price.
                    debug!(attempt, "bid lost the version race, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuctionError::Contention(lot_id))
    }

    /// The five ordered checks of the bid contract. Evaluated against a
    /// single snapshot; zero side effects on failure.
    fn check_preconditions(
        lot: &Lot,
        bidder: &BidderIdentity,
        amount: Amount,
        now: cg_common::Timestamp,
    ) -> Result<()> {
        if lot.status != LotStatus::Active {
            return Err(AuctionError::LotNotActive(lot.id));
        }
        if now >= lot.end_time {
            return Err(AuctionError::AuctionEnded(lot.id));
        }
        if lot.winning_bidder_id == Some(bidder.id) {
            return Err(AuctionError::AlreadyWinning(lot.id));
        }
        let minimum = lot.minimum_bid();
        if amount < minimum {
            return Err(AuctionError::BidTooLow { minimum });
        }
        Ok(())
    }

    /// Best-effort secondary effects; failures are logged, never propagated.
    async fn after_commit(&self, lot: &Lot, bid: &Bid, outbid: Option<Bid>, extended: bool) {
        let previous_bidder = outbid.as_ref().map(|b| b.user_id);

        if let Some(prev) = outbid {
            let note = Notification::outbid(prev.user_id, lot.id, &lot.title, bid.created_at);
            if let Err(e) = self.store.insert_notification(note).await {
                warn!(lot_id = %lot.id, error = %e, "failed to record outbid notification");
            }
        }

        if let Err(e) = self.store.record_bid_placed(bid.user_id).await {
            warn!(user_id = %bid.user_id, error = %e, "failed to bump bid counter");
        }

        self.bus.publish(AuctionEvent::BidPlaced {
            lot_id: lot.id,
            bidder_id: bid.user_id,
            amount: bid.amount,
            previous_bidder,
            extended,
            end_time: lot.end_time,
        });
    }

    async fn store_op<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.policy.store_op_timeout, fut).await {
            Ok(res) => res.map_err(AuctionError::from),
            Err(_) => Err(AuctionError::Timeout(self.policy.store_op_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Offer, SalesRecord, UserStats, WatchEntry};
    use crate::store::{BidSettlement, MemoryAuctionStore};
    use async_trait::async_trait;
    use cg_common::{OfferId, Timestamp, UserId};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ledger() -> (Arc<MemoryAuctionStore>, BidLedger<MemoryAuctionStore>) {
        let store = Arc::new(MemoryAuctionStore::new());
        let bus = EventBus::new();
        (store.clone(), BidLedger::new(store, bus, LedgerPolicy::default()))
    }

    async fn seed_lot(store: &MemoryAuctionStore, minutes_left: i64) -> Lot {
        let now = Utc::now();
        let lot = Lot::open(
            "Reel of 10k 0402 resistors",
            dec!(50),
            dec!(100),
            dec!(5),
            now - Duration::hours(2),
            now + Duration::minutes(minutes_left),
        );
        store.insert_lot(lot.clone()).await.unwrap();
        lot
    }

    #[tokio::test]
    async fn unknown_lot_is_rejected() {
        let (_store, ledger) = ledger();
        let err = ledger
            .place_bid(
                LotId::new(),
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOT_NOT_FOUND");
    }

    #[tokio::test]
    async fn closed_lot_is_rejected_before_amount_checks() {
        let (store, ledger) = ledger();
        let mut lot = seed_lot(&store, 60).await;
        lot.mark_unsold().unwrap();
        lot.version += 1;
        store.insert_lot(lot.clone()).await.unwrap();

        // Even an absurdly high bid fails on status first.
        let err = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(10_000),
                RequestMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOT_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn expired_lot_is_rejected() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, -1).await;
        let err = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUCTION_ENDED");
    }

    #[tokio::test]
    async fn current_winner_cannot_outbid_themselves() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;
        let alice = BidderIdentity::named(UserId::new(), "alice");

        ledger
            .place_bid(lot.id, &alice, dec!(55), RequestMeta::default())
            .await
            .unwrap();

        let err = ledger
            .place_bid(lot.id, &alice, dec!(500), RequestMeta::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_WINNING");
    }

    #[tokio::test]
    async fn minimum_increment_is_an_exact_boundary() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;

        // One cent below current + increment is rejected, with the minimum
        // reported back.
        let err = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(54.99),
                RequestMeta::default(),
            )
            .await
            .unwrap_err();
        match err {
            AuctionError::BidTooLow { minimum } => assert_eq!(minimum, dec!(55)),
            other => panic!("expected BidTooLow, got {other:?}"),
        }

        // Exactly current + increment is accepted.
        let accepted = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(accepted.lot.current_price, dec!(55));
    }

    #[tokio::test]
    async fn accepted_prices_are_strictly_increasing() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;

        let mut last = lot.current_price;
        for amount in [dec!(55), dec!(70), dec!(75), dec!(110)] {
            let res = ledger
                .place_bid(
                    lot.id,
                    &BidderIdentity::new(UserId::new()),
                    amount,
                    RequestMeta::default(),
                )
                .await
                .unwrap();
            assert!(res.lot.current_price > last);
            last = res.lot.current_price;
        }
        assert_eq!(last, dec!(110));
    }

    #[tokio::test]
    async fn reserve_warning_clears_once_reserve_is_met() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;

        let below = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(85),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert!(below.reserve_warning.is_some());
        assert!(!below.lot.reserve_met);

        let above = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(100),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert!(above.reserve_warning.is_none());
        assert!(above.lot.reserve_met);
    }

    #[tokio::test]
    async fn late_bids_keep_extending_the_auction() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 2).await;

        let first = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert!(first.lot.extended);
        assert_eq!(first.lot.extension_count, 1);
        assert!(first.lot.end_time > lot.end_time);

        // The second qualifying bid extends again — the rule applies on
        // every late bid, not just the first.
        let second = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(60),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(second.lot.extension_count, 2);
        assert!(second.lot.end_time >= first.lot.end_time);
    }

    #[tokio::test]
    async fn bid_with_plenty_of_time_left_does_not_extend() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;

        let res = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap();
        assert!(!res.lot.extended);
        assert_eq!(res.lot.end_time, lot.end_time);
    }

    #[tokio::test]
    async fn outbid_user_gets_a_notification_and_stats_are_bumped() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;
        let alice = BidderIdentity::named(UserId::new(), "alice");
        let bob = BidderIdentity::named(UserId::new(), "bob");

        ledger
            .place_bid(lot.id, &alice, dec!(55), RequestMeta::default())
            .await
            .unwrap();
        ledger
            .place_bid(lot.id, &bob, dec!(60), RequestMeta::default())
            .await
            .unwrap();

        let notes = store.notifications_for_user(alice.id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, crate::domain::NotificationKind::Outbid);

        assert_eq!(store.user_stats(alice.id).await.unwrap().total_bids, 1);
        assert_eq!(store.user_stats(bob.id).await.unwrap().total_bids, 1);
    }

    #[tokio::test]
    async fn rejected_bid_leaves_no_trace() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;
        let carol = BidderIdentity::new(UserId::new());

        let _ = ledger
            .place_bid(lot.id, &carol, dec!(1), RequestMeta::default())
            .await
            .unwrap_err();

        assert!(store.bids_for_lot(lot.id).await.unwrap().is_empty());
        assert_eq!(store.user_stats(carol.id).await.unwrap().total_bids, 0);
        let unchanged = store.lot(lot.id).await.unwrap().unwrap();
        assert_eq!(unchanged.current_price, dec!(50));
        assert_eq!(unchanged.version, 0);
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_before_the_store() {
        let (store, ledger) = ledger();
        let lot = seed_lot(&store, 120).await;

        for amount in [dec!(0), dec!(-10)] {
            let err = ledger
                .place_bid(
                    lot.id,
                    &BidderIdentity::new(UserId::new()),
                    amount,
                    RequestMeta::default(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.code(), "BID_AMOUNT_REQUIRED");
        }
        assert!(store.bids_for_lot(lot.id).await.unwrap().is_empty());
    }

    /// Store whose bid commits always lose the version race; everything
    /// else delegates to the in-memory store.
    struct ContendedStore {
        inner: MemoryAuctionStore,
        commit_attempts: AtomicU32,
    }

    #[async_trait]
    impl AuctionStore for ContendedStore {
        async fn insert_lot(&self, lot: Lot) -> Result<(), StoreError> {
            self.inner.insert_lot(lot).await
        }
        async fn lot(&self, id: LotId) -> Result<Option<Lot>, StoreError> {
            self.inner.lot(id).await
        }
        async fn expired_active_lots(&self, now: Timestamp) -> Result<Vec<LotId>, StoreError> {
            self.inner.expired_active_lots(now).await
        }
        async fn lots_ending_within(
            &self,
            now: Timestamp,
            horizon: Duration,
        ) -> Result<Vec<Lot>, StoreError> {
            self.inner.lots_ending_within(now, horizon).await
        }
        async fn commit_bid(
            &self,
            lot: Lot,
            _expected_version: u64,
            _bid: Bid,
        ) -> Result<(Lot, Option<Bid>), StoreError> {
            self.commit_attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::VersionConflict(lot.id))
        }
        async fn settle_lot(
            &self,
            lot: Lot,
            expected_version: u64,
            settlement: BidSettlement,
            sale: Option<SalesRecord>,
        ) -> Result<Lot, StoreError> {
            self.inner
                .settle_lot(lot, expected_version, settlement, sale)
                .await
        }
        async fn bids_for_lot(&self, lot_id: LotId) -> Result<Vec<Bid>, StoreError> {
            self.inner.bids_for_lot(lot_id).await
        }
        async fn active_bidders(&self, lot_id: LotId) -> Result<Vec<UserId>, StoreError> {
            self.inner.active_bidders(lot_id).await
        }
        async fn insert_offer(&self, offer: Offer) -> Result<(), StoreError> {
            self.inner.insert_offer(offer).await
        }
        async fn offer(&self, id: OfferId) -> Result<Option<Offer>, StoreError> {
            self.inner.offer(id).await
        }
        async fn update_offer(&self, offer: Offer) -> Result<(), StoreError> {
            self.inner.update_offer(offer).await
        }
        async fn pending_offer_for(
            &self,
            lot_id: LotId,
            user_id: UserId,
        ) -> Result<Option<Offer>, StoreError> {
            self.inner.pending_offer_for(lot_id, user_id).await
        }
        async fn reject_other_pending_offers(
            &self,
            lot_id: LotId,
            except: OfferId,
        ) -> Result<Vec<Offer>, StoreError> {
            self.inner.reject_other_pending_offers(lot_id, except).await
        }
        async fn sale_for_lot(&self, lot_id: LotId) -> Result<Option<SalesRecord>, StoreError> {
            self.inner.sale_for_lot(lot_id).await
        }
        async fn insert_notification(&self, n: Notification) -> Result<(), StoreError> {
            self.inner.insert_notification(n).await
        }
        async fn insert_notification_if_absent(
            &self,
            n: Notification,
        ) -> Result<bool, StoreError> {
            self.inner.insert_notification_if_absent(n).await
        }
        async fn notifications_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<Notification>, StoreError> {
            self.inner.notifications_for_user(user_id).await
        }
        async fn insert_watch(&self, entry: WatchEntry) -> Result<(), StoreError> {
            self.inner.insert_watch(entry).await
        }
        async fn watchers_pending_ending_notice(
            &self,
            lot_id: LotId,
        ) -> Result<Vec<UserId>, StoreError> {
            self.inner.watchers_pending_ending_notice(lot_id).await
        }
        async fn mark_watchers_notified(&self, lot_id: LotId) -> Result<(), StoreError> {
            self.inner.mark_watchers_notified(lot_id).await
        }
        async fn record_bid_placed(&self, user_id: UserId) -> Result<(), StoreError> {
            self.inner.record_bid_placed(user_id).await
        }
        async fn record_win(&self, user_id: UserId, amount: Amount) -> Result<(), StoreError> {
            self.inner.record_win(user_id, amount).await
        }
        async fn user_stats(&self, user_id: UserId) -> Result<UserStats, StoreError> {
            self.inner.user_stats(user_id).await
        }
    }

    #[tokio::test]
    async fn exhausted_write_retries_surface_as_contention() {
        let store = Arc::new(ContendedStore {
            inner: MemoryAuctionStore::new(),
            commit_attempts: AtomicU32::new(0),
        });
        let now = Utc::now();
        let lot = Lot::open(
            "Reel of SMD LEDs",
            dec!(50),
            dec!(100),
            dec!(5),
            now - Duration::hours(1),
            now + Duration::hours(1),
        );
        store.insert_lot(lot.clone()).await.unwrap();

        let policy = LedgerPolicy::default();
        let ledger = BidLedger::new(store.clone(), EventBus::new(), policy);

        let err = ledger
            .place_bid(
                lot.id,
                &BidderIdentity::new(UserId::new()),
                dec!(55),
                RequestMeta::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOT_CONTENTION");
        assert!(err.is_transient());

        // One initial attempt plus the full retry allowance.
        assert_eq!(
            store.commit_attempts.load(Ordering::SeqCst),
            policy.write_retry_limit + 1
        );
        // Nothing landed in the backing store.
        assert!(store.inner.bids_for_lot(lot.id).await.unwrap().is_empty());
        assert_eq!(
            store.inner.lot(lot.id).await.unwrap().unwrap().version,
            0
        );
    }
}
