//! Out-of-band offers on lots that allow them.
//!
//! Submission validates against the lot's offer settings; the admin response
//! path (accept / reject / counter) runs out-of-band from bidding, but
//! acceptance reaches the same terminal "sold" state as the closing sweep
//! and therefore goes through the same store CAS.  The lot settlement
//! commits first; only then is the offer row flipped, the bid chain having
//! already been settled as lost in the same transaction.  A crash between
//! the two leaves a sold lot with a pending offer, which an operator can
//! re-accept (the flip is idempotent), never a double sale.

use std::sync::Arc;

use cg_common::{Amount, LotId, OfferId, UserId};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::domain::{
    BidderIdentity, Lot, LotStatus, Notification, Offer, SaleType, SalesRecord,
};
use crate::error::{AuctionError, Result};
use crate::events::{AuctionEvent, EventBus};
use crate::store::{AuctionStore, BidSettlement, StoreError};

/// Tunables for the desk.
#[derive(Debug, Clone, Copy)]
pub struct DeskPolicy {
    /// CAS conflicts absorbed while settling an accepted offer.
    pub settle_retry_limit: u32,
}

impl Default for DeskPolicy {
    fn default() -> Self {
        Self {
            settle_retry_limit: 4,
        }
    }
}

pub struct OfferDesk<S: AuctionStore> {
    store: Arc<S>,
    bus: EventBus,
    policy: DeskPolicy,
}

impl<S: AuctionStore> OfferDesk<S> {
    pub fn new(store: Arc<S>, bus: EventBus, policy: DeskPolicy) -> Self {
        Self { store, bus, policy }
    }

    /// Record a buyer's offer on a lot.
    ///
    /// One pending offer per user per lot; a rejected or countered offer
    /// frees the slot for a new one.
    #[instrument(skip(self, user, message), fields(lot_id = %lot_id, user_id = %user.id, %amount))]
    pub async fn submit_offer(
        &self,
        lot_id: LotId,
        user: &BidderIdentity,
        amount: Amount,
        message: Option<String>,
    ) -> Result<Offer> {
        let lot = self
            .store
            .lot(lot_id)
            .await?
            .ok_or(AuctionError::LotNotFound(lot_id))?;

        if lot.status != LotStatus::Active {
            return Err(AuctionError::LotNotActive(lot_id));
        }
        if !lot.allow_offers {
            return Err(AuctionError::OffersNotAllowed(lot_id));
        }
        if amount <= Decimal::ZERO {
            return Err(AuctionError::OfferAmountRequired);
        }
        if let Some(minimum) = lot.minimum_offer {
            if amount < minimum {
                return Err(AuctionError::OfferTooLow { minimum });
            }
        }
        if self.store.pending_offer_for(lot_id, user.id).await?.is_some() {
            return Err(AuctionError::OfferAlreadyExists(lot_id));
        }

        let offer = Offer::pending(
            lot_id,
            user.id,
            Some(lot.title.clone()),
            user.display_name.clone(),
            amount,
            message,
            Utc::now(),
        );
        self.store.insert_offer(offer.clone()).await?;

        self.bus.publish(AuctionEvent::OfferReceived {
            lot_id,
            offer_id: offer.id,
            user_id: user.id,
            amount,
        });
        Ok(offer)
    }

    /// Accept a pending offer: sell the lot to the offerer at the offer
    /// amount, settle every bid as lost, reject the sibling offers.
    #[instrument(skip(self, response), fields(offer_id = %offer_id, admin_id = %admin.id))]
    pub async fn accept_offer(
        &self,
        offer_id: OfferId,
        admin: &BidderIdentity,
        response: Option<String>,
    ) -> Result<Offer> {
        let mut offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or(AuctionError::OfferNotFound(offer_id))?;
        if !offer.is_pending() {
            return Err(AuctionError::OfferNotPending(offer_id));
        }

        let lot = self.settle_for_offer(&offer).await?;
        let now = Utc::now();

        offer.accept(admin.id, response, now);
        self.store.update_offer(offer.clone()).await?;

        // Everything past the settlement is best-effort.
        match self
            .store
            .reject_other_pending_offers(offer.lot_id, offer.id)
            .await
        {
            Ok(siblings) => {
                for sib in siblings {
                    let note = Notification::offer_rejected(
                        sib.user_id,
                        sib.lot_id,
                        sib.id,
                        &lot.title,
                        now,
                    );
                    if let Err(e) = self.store.insert_notification(note).await {
                        warn!(offer_id = %sib.id, error = %e, "failed to notify rejected offerer");
                    }
                }
            }
            Err(e) => {
                warn!(lot_id = %offer.lot_id, error = %e, "failed to reject sibling offers");
            }
        }

        let note = Notification::offer_accepted(
            offer.user_id,
            offer.lot_id,
            offer.id,
            &lot.title,
            offer.amount,
            now,
        );
        if let Err(e) = self.store.insert_notification(note).await {
            warn!(offer_id = %offer.id, error = %e, "failed to notify accepted offerer");
        }
        if let Err(e) = self.store.record_win(offer.user_id, offer.amount).await {
            warn!(user_id = %offer.user_id, error = %e, "failed to bump buyer stats");
        }

        self.bus.publish(AuctionEvent::OfferAccepted {
            lot_id: offer.lot_id,
            offer_id: offer.id,
            buyer: offer.user_id,
            amount: offer.amount,
        });
        Ok(offer)
    }

    /// Move the lot to `sold` under the version CAS. Retries on conflict,
    /// re-checking that nobody else (the sweep, a racing accept) settled it
    /// first.
    async fn settle_for_offer(&self, offer: &Offer) -> Result<Lot> {
        for attempt in 0..=self.policy.settle_retry_limit {
            let lot = self
                .store
                .lot(offer.lot_id)
                .await?
                .ok_or(AuctionError::LotNotFound(offer.lot_id))?;
            if lot.status != LotStatus::Active {
                return Err(AuctionError::LotNotActive(offer.lot_id));
            }

            let now = Utc::now();
            let mut updated = lot.clone();
            updated
                .mark_sold(offer.user_id, offer.amount, now)
                .map_err(|e| AuctionError::Store(StoreError::Backend(e.to_string())))?;

            let sale = SalesRecord::new(
                lot.id,
                offer.user_id,
                SaleType::OfferAccepted,
                offer.amount,
                &lot.title,
                lot.mpn.clone(),
                offer.user_name.clone(),
                now,
            );

            match self
                .store
                .settle_lot(updated, lot.version, BidSettlement::AllLost, Some(sale))
                .await
            {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict(_)) => {
                    debug!(attempt, lot_id = %lot.id, "offer settlement lost the version race, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuctionError::Contention(offer.lot_id))
    }

    /// Decline a pending offer.
    #[instrument(skip(self, response), fields(offer_id = %offer_id, admin_id = %admin.id))]
    pub async fn reject_offer(
        &self,
        offer_id: OfferId,
        admin: &BidderIdentity,
        response: Option<String>,
    ) -> Result<Offer> {
        let mut offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or(AuctionError::OfferNotFound(offer_id))?;
        if !offer.is_pending() {
            return Err(AuctionError::OfferNotPending(offer_id));
        }

        let now = Utc::now();
        offer.reject(admin.id, response, now);
        self.store.update_offer(offer.clone()).await?;

        let title = offer.lot_title.clone().unwrap_or_default();
        let note = Notification::offer_rejected(offer.user_id, offer.lot_id, offer.id, &title, now);
        if let Err(e) = self.store.insert_notification(note).await {
            warn!(offer_id = %offer.id, error = %e, "failed to notify rejected offerer");
        }
        Ok(offer)
    }

    /// Counter a pending offer at a new amount.
    #[instrument(skip(self, response), fields(offer_id = %offer_id, admin_id = %admin.id, %counter_amount))]
    pub async fn counter_offer(
        &self,
        offer_id: OfferId,
        admin: &BidderIdentity,
        counter_amount: Amount,
        response: Option<String>,
    ) -> Result<Offer> {
        if counter_amount <= Decimal::ZERO {
            return Err(AuctionError::OfferAmountRequired);
        }

        let mut offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or(AuctionError::OfferNotFound(offer_id))?;
        if !offer.is_pending() {
            return Err(AuctionError::OfferNotPending(offer_id));
        }

        let now = Utc::now();
        offer.counter(admin.id, counter_amount, response, now);
        self.store.update_offer(offer.clone()).await?;

        let title = offer.lot_title.clone().unwrap_or_default();
        let note = Notification::offer_countered(
            offer.user_id,
            offer.lot_id,
            offer.id,
            &title,
            counter_amount,
            now,
        );
        if let Err(e) = self.store.insert_notification(note).await {
            warn!(offer_id = %offer.id, error = %e, "failed to notify countered offerer");
        }
        Ok(offer)
    }

    /// Let a buyer pull their own pending offer.
    #[instrument(skip(self), fields(offer_id = %offer_id, user_id = %user_id))]
    pub async fn withdraw_offer(&self, offer_id: OfferId, user_id: UserId) -> Result<Offer> {
        let mut offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or(AuctionError::OfferNotFound(offer_id))?;
        // Another user's offer reads as absent rather than forbidden.
        if offer.user_id != user_id {
            return Err(AuctionError::OfferNotFound(offer_id));
        }
        if !offer.is_pending() {
            return Err(AuctionError::OfferNotPending(offer_id));
        }

        offer.withdraw();
        self.store.update_offer(offer.clone()).await?;
        Ok(offer)
    }
}
