//! Service-wide error taxonomy.
//!
//! Every rejection a client can see carries a stable machine-readable code
//! so the bidding UI can explain exactly why (too low, ended, already
//! winning) and show the minimum valid amount.  Transient contention is
//! retried internally and only surfaces once retries are exhausted.

use std::time::Duration;

use cg_common::{Amount, LotId, OfferId};
use thiserror::Error;

use crate::store::StoreError;

pub type Result<T, E = AuctionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("lot {0} not found")]
    LotNotFound(LotId),

    #[error("lot {0} is not active")]
    LotNotActive(LotId),

    #[error("auction for lot {0} has ended")]
    AuctionEnded(LotId),

    #[error("you are already the winning bidder on lot {0}")]
    AlreadyWinning(LotId),

    #[error("bid must be at least ${minimum} (current price + increment)")]
    BidTooLow { minimum: Amount },

    #[error("bid amount must be a positive amount")]
    BidAmountRequired,

    #[error("offer amount must be a positive amount")]
    OfferAmountRequired,

    #[error("offer {0} not found")]
    OfferNotFound(OfferId),

    #[error("only pending offers can be acted on ({0})")]
    OfferNotPending(OfferId),

    #[error("offers are not allowed for lot {0}")]
    OffersNotAllowed(LotId),

    #[error("offer must be at least ${minimum}")]
    OfferTooLow { minimum: Amount },

    #[error("you already have a pending offer on lot {0}")]
    OfferAlreadyExists(LotId),

    /// Write conflicts on the lot exhausted the internal retry budget.
    #[error("lot {0} is under heavy contention, try again")]
    Contention(LotId),

    /// A store operation exceeded its deadline.
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected persistence failure; details are logged, not leaked.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl AuctionError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::LotNotFound(_) => "LOT_NOT_FOUND",
            AuctionError::LotNotActive(_) => "LOT_NOT_ACTIVE",
            AuctionError::AuctionEnded(_) => "AUCTION_ENDED",
            AuctionError::AlreadyWinning(_) => "ALREADY_WINNING",
            AuctionError::BidTooLow { .. } => "BID_TOO_LOW",
            AuctionError::BidAmountRequired => "BID_AMOUNT_REQUIRED",
            AuctionError::OfferAmountRequired => "OFFER_AMOUNT_REQUIRED",
            AuctionError::OfferNotFound(_) => "OFFER_NOT_FOUND",
            AuctionError::OfferNotPending(_) => "OFFER_NOT_PENDING",
            AuctionError::OffersNotAllowed(_) => "OFFERS_NOT_ALLOWED",
            AuctionError::OfferTooLow { .. } => "OFFER_TOO_LOW",
            AuctionError::OfferAlreadyExists(_) => "OFFER_ALREADY_EXISTS",
            AuctionError::Contention(_) => "LOT_CONTENTION",
            AuctionError::Timeout(_) => "STORE_TIMEOUT",
            AuctionError::Store(_) => "INTERNAL",
        }
    }

    /// Whether a client retry with the same payload could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuctionError::Contention(_) | AuctionError::Timeout(_)
        )
    }
}
