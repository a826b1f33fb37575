//! Canonical, cross-crate types for the CopperGavel marketplace code-base.
//!
//! This crate is **dependency-light** and **stable**, making it safe to be
//! imported by every service, CLI tool and background worker.

pub mod error;
pub mod types;

pub use error::{CgCommonError, Result};
pub use types::{Amount, BidId, LotId, NotificationId, OfferId, SaleId, Timestamp, UserId};
