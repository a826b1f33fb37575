//! CopperGavel auction service.
//!
//! This service owns the one genuinely hazardous piece of the marketplace:
//! the bid-acceptance and auction-closing transaction logic.  Everything else
//! (auth, uploads, catalogue CRUD) lives in thin collaborator services.
//!
//! Responsibilities
//! * Accept bids with monotonic-price, timing and anti-snipe invariants
//!   ([`bid_ledger::BidLedger`]).
//! * Sweep and settle expired auctions exactly once
//!   ([`auction_closer::AuctionCloser`]).
//! * Handle out-of-band purchase offers, sharing the same lot serialization
//!   ([`offer_desk::OfferDesk`]).
//! * Publish domain events on an internal bus consumed by the notification
//!   delivery worker ([`events`], [`notifier`]).
//!
//! All coordination between concurrent bids, sweeps and offer acceptance is
//! pushed down to the [`store::AuctionStore`] seam, which serializes
//! conflicting writes per lot via optimistic versioning.

pub mod auction_closer;
pub mod bid_ledger;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod notifier;
pub mod offer_desk;
pub mod rest_api;
pub mod scheduler;
pub mod store;

pub use error::{AuctionError, Result};
