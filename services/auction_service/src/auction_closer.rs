//! The closing sweep and the ending-soon notifier.
//!
//! [`AuctionCloser::close_expired_auctions`] finds active lots whose end
//! time has passed and settles each exactly once.  The candidate select is
//! only a snapshot: every lot is re-read and re-checked under the store's
//! version CAS before settlement, so a bid that raced in and extended the
//! lot makes the sweep skip it instead of force-closing.  That re-check is
//! also what makes re-running the sweep after a partial failure safe — an
//! already-settled lot is simply no longer eligible, and bid settlement
//! no-ops on terminal bids.
//!
//! One lot's failure never aborts the sweep; it is logged and the lot stays
//! `active` with `end_time` in the past, so the next tick retries it.

use std::{collections::BTreeSet, sync::Arc};

use cg_common::{LotId, Timestamp};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use crate::domain::{CloseOutcome, Lot, Notification, SaleType, SalesRecord};
use crate::error::{AuctionError, Result};
use crate::events::{AuctionEvent, EventBus};
use crate::store::{AuctionStore, BidSettlement, StoreError};

/// Tunables for the sweeps.
#[derive(Debug, Clone, Copy)]
pub struct CloserPolicy {
    /// Lots ending within this horizon get the ending-soon notice.
    pub ending_soon_horizon: Duration,
    /// CAS conflicts absorbed per lot before leaving it for the next sweep.
    pub settle_retry_limit: u32,
}

impl Default for CloserPolicy {
    fn default() -> Self {
        Self {
            ending_soon_horizon: Duration::minutes(10),
            settle_retry_limit: 2,
        }
    }
}

/// Aggregate result of one closing sweep.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CloseSummary {
    pub closed: u32,
}

/// Aggregate result of one ending-soon sweep.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NotifySummary {
    pub notified: u32,
}

pub struct AuctionCloser<S: AuctionStore> {
    store: Arc<S>,
    bus: EventBus,
    policy: CloserPolicy,
}

impl<S: AuctionStore> AuctionCloser<S> {
    pub fn new(store: Arc<S>, bus: EventBus, policy: CloserPolicy) -> Self {
        Self { store, bus, policy }
    }

    /// Settle every expired lot; idempotent and safe to run concurrently
    /// with bids and with another sweep instance.
    #[instrument(skip(self))]
    pub async fn close_expired_auctions(&self) -> CloseSummary {
        let now = Utc::now();
        let candidates = match self.store.expired_active_lots(now).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "closing sweep failed to fetch expired lots");
                return CloseSummary { closed: 0 };
            }
        };

        let mut closed = 0;
        for lot_id in candidates {
            match self.close_one(lot_id).await {
                Ok(true) => closed += 1,
                Ok(false) => debug!(%lot_id, "lot no longer eligible, skipped"),
                Err(e) => {
                    // Left for the next sweep; the lot is still active with
                    // end_time in the past, so it will be picked up again.
                    warn!(%lot_id, error = %e, "failed to close lot, will retry next sweep");
                }
            }
        }
        CloseSummary { closed }
    }

    /// Close a single lot. Returns `Ok(false)` when the lot turned out not
    /// to be eligible after the re-check (extended, or settled by a
    /// concurrent run).
    async fn close_one(&self, lot_id: LotId) -> Result<bool> {
        for _ in 0..=self.policy.settle_retry_limit {
            let Some(lot) = self.store.lot(lot_id).await? else {
                return Ok(false);
            };

            let now = Utc::now();
            if !lot.is_due_for_close(now) {
                return Ok(false);
            }

            let settled = match lot.close_outcome() {
                CloseOutcome::Sold => self.settle_sold(&lot, now).await,
                CloseOutcome::Unsold => self.settle_unsold(&lot).await,
            };

            match settled {
                Ok(()) => return Ok(true),
                Err(AuctionError::Store(StoreError::VersionConflict(_))) => {
                    // A bid (or another sweep) won the race; re-read and
                    // re-check eligibility.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn settle_sold(&self, lot: &Lot, now: Timestamp) -> Result<()> {
        // Invariant: a sold outcome implies bid_count > 0, which implies a
        // winning bidder. A violation is data corruption, not a race.
        let Some(winner) = lot.winning_bidder_id else {
            return Err(AuctionError::Store(StoreError::Backend(format!(
                "lot {} has bids but no winning bidder",
                lot.id
            ))));
        };
        let price = lot.current_price;

        let mut updated = lot.clone();
        updated
            .mark_sold(winner, price, now)
            .map_err(|e| AuctionError::Store(StoreError::Backend(e.to_string())))?;

        let sale = SalesRecord::new(
            lot.id,
            winner,
            SaleType::AuctionWin,
            price,
            &lot.title,
            lot.mpn.clone(),
            lot.winning_bidder_name.clone(),
            now,
        );
        let sale_id = sale.id;

        self.store
            .settle_lot(updated, lot.version, BidSettlement::AuctionWin, Some(sale))
            .await?;

        // Secondary effects: best-effort, logged on failure.
        let note = Notification::won(winner, lot.id, &lot.title, price, now);
        if let Err(e) = self.store.insert_notification(note).await {
            warn!(lot_id = %lot.id, error = %e, "failed to record won notification");
        }
        if let Err(e) = self.store.record_win(winner, price).await {
            warn!(user_id = %winner, error = %e, "failed to bump winner stats");
        }

        self.bus.publish(AuctionEvent::LotSold {
            lot_id: lot.id,
            winner,
            price,
            sale_id,
        });
        Ok(())
    }

    async fn settle_unsold(&self, lot: &Lot) -> Result<()> {
        let mut updated = lot.clone();
        updated
            .mark_unsold()
            .map_err(|e| AuctionError::Store(StoreError::Backend(e.to_string())))?;

        self.store
            .settle_lot(updated, lot.version, BidSettlement::AllLost, None)
            .await?;

        self.bus.publish(AuctionEvent::LotUnsold { lot_id: lot.id });
        Ok(())
    }

    /// Notify watchers and active bidders of lots ending inside the horizon,
    /// once per lot per user.
    #[instrument(skip(self))]
    pub async fn notify_ending_soon(&self) -> NotifySummary {
        let now = Utc::now();
        let ending = match self
            .store
            .lots_ending_within(now, self.policy.ending_soon_horizon)
            .await
        {
            Ok(lots) => lots,
            Err(e) => {
                error!(error = %e, "ending-soon sweep failed to fetch lots");
                return NotifySummary { notified: 0 };
            }
        };

        let mut notified = 0;
        for lot in ending {
            match self.notify_lot(&lot, now).await {
                Ok(n) => notified += n,
                Err(e) => {
                    warn!(lot_id = %lot.id, error = %e, "failed to send ending-soon notices");
                }
            }
        }
        NotifySummary { notified }
    }

    async fn notify_lot(&self, lot: &Lot, now: Timestamp) -> Result<u32> {
        let watchers = self.store.watchers_pending_ending_notice(lot.id).await?;
        let bidders = self.store.active_bidders(lot.id).await?;

        let recipients: BTreeSet<_> = watchers.iter().chain(bidders.iter()).copied().collect();

        let mut sent = 0;
        for user in recipients {
            let note = Notification::ending_soon(user, lot.id, &lot.title, now);
            // Deduplicated on (user, lot, kind): repeat sweeps inside the
            // horizon stay silent.
            if self.store.insert_notification_if_absent(note).await? {
                sent += 1;
            }
        }

        if !watchers.is_empty() {
            self.store.mark_watchers_notified(lot.id).await?;
        }

        if sent > 0 {
            self.bus.publish(AuctionEvent::EndingSoon {
                lot_id: lot.id,
                end_time: lot.end_time,
            });
        }
        Ok(sent)
    }
}
