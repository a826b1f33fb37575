//! Thread-safe in-memory store.
//!
//! Meant for tests and local development, *not* production.  A single
//! `RwLock` guards all tables, which trivially makes each transactional
//! operation atomic; the lock is held only for the synchronous map work, so
//! lots do not meaningfully contend with each other.  A SQL-backed
//! implementation would replace each method body with one transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use cg_common::{Amount, BidId, LotId, NotificationId, OfferId, Timestamp, UserId};
use chrono::Duration;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::{
    Bid, Lot, Notification, Offer, OfferStatus, SalesRecord, UserStats, WatchEntry,
};

use super::{AuctionStore, BidSettlement, StoreError};

#[derive(Default)]
struct Inner {
    lots: HashMap<LotId, Lot>,
    bids: HashMap<BidId, Bid>,
    offers: HashMap<OfferId, Offer>,
    sales: HashMap<LotId, SalesRecord>,
    notifications: HashMap<NotificationId, Notification>,
    watchlist: Vec<WatchEntry>,
    stats: HashMap<UserId, UserStats>,
}

impl Inner {
    /// CAS guard shared by the transactional operations.
    fn take_lot_at_version(&mut self, id: LotId, expected: u64) -> Result<(), StoreError> {
        match self.lots.get(&id) {
            None => Err(StoreError::NotFound(format!("lot {id}"))),
            Some(stored) if stored.version != expected => Err(StoreError::VersionConflict(id)),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuctionStore {
    inner: RwLock<Inner>,
}

impl MemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    #[instrument(skip(self, lot), fields(lot_id = %lot.id))]
    async fn insert_lot(&self, lot: Lot) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.lots.insert(lot.id, lot);
        Ok(())
    }

    async fn lot(&self, id: LotId) -> Result<Option<Lot>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.lots.get(&id).cloned())
    }

    async fn expired_active_lots(&self, now: Timestamp) -> Result<Vec<LotId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .lots
            .values()
            .filter(|l| l.is_due_for_close(now))
            .map(|l| l.id)
            .collect())
    }

    async fn lots_ending_within(
        &self,
        now: Timestamp,
        horizon: Duration,
    ) -> Result<Vec<Lot>, StoreError> {
        let cutoff = now + horizon;
        let inner = self.inner.read().await;
        Ok(inner
            .lots
            .values()
            .filter(|l| l.is_open_for_bids(now) && l.end_time <= cutoff)
            .cloned()
            .collect())
    }

    #[instrument(skip(self, lot, bid), fields(lot_id = %lot.id, bid_id = %bid.id))]
    async fn commit_bid(
        &self,
        mut lot: Lot,
        expected_version: u64,
        bid: Bid,
    ) -> Result<(Lot, Option<Bid>), StoreError> {
        let mut inner = self.inner.write().await;
        inner.take_lot_at_version(lot.id, expected_version)?;

        lot.version = expected_version + 1;

        // Demote the previous winning bid, if any.
        let mut outbid = None;
        if let Some(prev) = inner
            .bids
            .values_mut()
            .find(|b| b.lot_id == lot.id && b.is_winning && b.id != bid.id)
        {
            prev.mark_outbid();
            outbid = Some(prev.clone());
        }

        inner.bids.insert(bid.id, bid);
        inner.lots.insert(lot.id, lot.clone());
        Ok((lot, outbid))
    }

    #[instrument(skip(self, lot, sale), fields(lot_id = %lot.id))]
    async fn settle_lot(
        &self,
        mut lot: Lot,
        expected_version: u64,
        settlement: BidSettlement,
        sale: Option<SalesRecord>,
    ) -> Result<Lot, StoreError> {
        let mut inner = self.inner.write().await;
        inner.take_lot_at_version(lot.id, expected_version)?;

        lot.version = expected_version + 1;

        for b in inner.bids.values_mut().filter(|b| b.lot_id == lot.id) {
            match settlement {
                BidSettlement::AuctionWin if b.is_winning => b.settle_won(),
                _ => b.settle_lost(),
            }
        }

        if let Some(sale) = sale {
            inner.sales.insert(lot.id, sale);
        }

        inner.lots.insert(lot.id, lot.clone());
        Ok(lot)
    }

    async fn bids_for_lot(&self, lot_id: LotId) -> Result<Vec<Bid>, StoreError> {
        let inner = self.inner.read().await;
        let mut bids: Vec<Bid> = inner
            .bids
            .values()
            .filter(|b| b.lot_id == lot_id)
            .cloned()
            .collect();
        bids.sort_by_key(|b| b.created_at);
        Ok(bids)
    }

    async fn active_bidders(&self, lot_id: LotId) -> Result<Vec<UserId>, StoreError> {
        let inner = self.inner.read().await;
        let mut users: Vec<UserId> = inner
            .bids
            .values()
            .filter(|b| b.lot_id == lot_id && !b.status.is_terminal())
            .map(|b| b.user_id)
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn insert_offer(&self, offer: Offer) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.offers.get(&id).cloned())
    }

    async fn update_offer(&self, offer: Offer) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.offers.contains_key(&offer.id) {
            return Err(StoreError::NotFound(format!("offer {}", offer.id)));
        }
        inner.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn pending_offer_for(
        &self,
        lot_id: LotId,
        user_id: UserId,
    ) -> Result<Option<Offer>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .offers
            .values()
            .find(|o| o.lot_id == lot_id && o.user_id == user_id && o.is_pending())
            .cloned())
    }

    async fn reject_other_pending_offers(
        &self,
        lot_id: LotId,
        except: OfferId,
    ) -> Result<Vec<Offer>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut rejected = Vec::new();
        for o in inner
            .offers
            .values_mut()
            .filter(|o| o.lot_id == lot_id && o.id != except && o.is_pending())
        {
            o.status = OfferStatus::Rejected;
            rejected.push(o.clone());
        }
        Ok(rejected)
    }

    async fn sale_for_lot(&self, lot_id: LotId) -> Result<Option<SalesRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sales.get(&lot_id).cloned())
    }

    async fn insert_notification(&self, n: Notification) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.notifications.insert(n.id, n);
        Ok(())
    }

    async fn insert_notification_if_absent(&self, n: Notification) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .notifications
            .values()
            .any(|x| x.user_id == n.user_id && x.lot_id == n.lot_id && x.kind == n.kind);
        if exists {
            return Ok(false);
        }
        inner.notifications.insert(n.id, n);
        Ok(true)
    }

    async fn notifications_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|n| n.created_at);
        Ok(rows)
    }

    async fn insert_watch(&self, entry: WatchEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.watchlist.push(entry);
        Ok(())
    }

    async fn watchers_pending_ending_notice(
        &self,
        lot_id: LotId,
    ) -> Result<Vec<UserId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .watchlist
            .iter()
            .filter(|w| w.lot_id == lot_id && w.notify_on_ending && !w.notified_ending)
            .map(|w| w.user_id)
            .collect())
    }

    async fn mark_watchers_notified(&self, lot_id: LotId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for w in inner
            .watchlist
            .iter_mut()
            .filter(|w| w.lot_id == lot_id && w.notify_on_ending)
        {
            w.notified_ending = true;
        }
        Ok(())
    }

    async fn record_bid_placed(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.stats.entry(user_id).or_default().total_bids += 1;
        Ok(())
    }

    async fn record_win(&self, user_id: UserId, amount: Amount) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stats = inner.stats.entry(user_id).or_default();
        stats.total_wins += 1;
        stats.total_spent += amount;
        Ok(())
    }

    async fn user_stats(&self, user_id: UserId) -> Result<UserStats, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.stats.get(&user_id).copied().unwrap_or_default())
    }
}
