//! Primitive new-types and aliases used across the marketplace.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CgCommonError, Result};

/// UTC wall-clock instant.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Monetary amount in the marketplace currency (USD). Decimal, not float:
/// bid comparisons are exact down to the cent.
pub type Amount = rust_decimal::Decimal;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[inline]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = CgCommonError;

            fn from_str(s: &str) -> Result<Self> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// One auctionable item (a "lot") and its live auction state.
    LotId
}
uuid_id! {
    /// An authenticated marketplace user (bidder, watcher or admin).
    UserId
}
uuid_id! {
    /// A single bid event on a lot.
    BidId
}
uuid_id! {
    /// An out-of-band purchase proposal on a lot.
    OfferId
}
uuid_id! {
    /// A durable sale receipt created at settlement.
    SaleId
}
uuid_id! {
    /// A fire-and-forget notification row.
    NotificationId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lot_id_round_trips_through_display() {
        let id = LotId::new();
        let parsed: LotId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn malformed_id_is_rejected() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }
}
