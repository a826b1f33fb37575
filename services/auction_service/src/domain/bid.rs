//! One bid event on a lot.
//!
//! Amount and bidder are immutable after insert; only `is_winning` and
//! `status` move, first when a later bid outbids this one and finally when
//! the lot settles.  Settlement helpers are deliberately idempotent: the
//! closing sweep may re-run after a partial failure, and re-settling a bid
//! that is already terminal must be a no-op.

use cg_common::{Amount, BidId, LotId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use super::RequestMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    /// Still in the running (currently winning, or merely recorded).
    Active,
    /// A later bid took the lead.
    Outbid,
    /// Terminal: this bid won the lot.
    Won,
    /// Terminal: the lot settled without this bid winning.
    Lost,
}

impl BidStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BidStatus::Won | BidStatus::Lost)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub lot_id: LotId,
    pub user_id: UserId,
    pub user_name: Option<String>,
    pub amount: Amount,
    pub is_winning: bool,
    pub status: BidStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: Timestamp,
}

impl Bid {
    /// A freshly accepted, currently-winning bid.
    pub fn winning(
        lot_id: LotId,
        user_id: UserId,
        user_name: Option<String>,
        amount: Amount,
        meta: &RequestMeta,
        now: Timestamp,
    ) -> Self {
        Self {
            id: BidId::new(),
            lot_id,
            user_id,
            user_name,
            amount,
            is_winning: true,
            status: BidStatus::Active,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: now,
        }
    }

    /// A later bid took the lead. No-op once terminal.
    pub fn mark_outbid(&mut self) {
        if !self.status.is_terminal() {
            self.status = BidStatus::Outbid;
            self.is_winning = false;
        }
    }

    /// Terminal settlement: this bid won. No-op once terminal.
    pub fn settle_won(&mut self) {
        if !self.status.is_terminal() {
            self.status = BidStatus::Won;
        }
    }

    /// Terminal settlement: this bid lost. No-op once terminal.
    pub fn settle_lost(&mut self) {
        if !self.status.is_terminal() {
            self.status = BidStatus::Lost;
            self.is_winning = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bid() -> Bid {
        Bid::winning(
            LotId::new(),
            UserId::new(),
            Some("jlee".into()),
            dec!(55),
            &RequestMeta::default(),
            Utc::now(),
        )
    }

    #[test]
    fn settlement_is_idempotent() {
        let mut b = bid();
        b.settle_won();
        assert_eq!(b.status, BidStatus::Won);
        assert!(b.is_winning);

        // Re-running the close path must not flip a won bid to lost.
        b.settle_lost();
        assert_eq!(b.status, BidStatus::Won);
    }

    #[test]
    fn outbid_clears_winning_flag() {
        let mut b = bid();
        b.mark_outbid();
        assert_eq!(b.status, BidStatus::Outbid);
        assert!(!b.is_winning);

        b.settle_lost();
        assert_eq!(b.status, BidStatus::Lost);
        b.mark_outbid();
        assert_eq!(b.status, BidStatus::Lost, "terminal bids never reopen");
    }
}
