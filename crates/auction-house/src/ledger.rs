//! In-memory authoritative view of the current highest bid per auction.
//!
//! The ledger is derived from stored records and consulted on every bid so
//! two requests can never both observe the same "current highest" and both
//! get accepted. Callers must serialize access per auction through the
//! lifecycle lock; the ledger itself only guarantees that a single entry is
//! read and written atomically.

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    model::auction::{Auction, AuctionId, AuctionStatus, Bid, UserId},
};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BidRejection {
    #[error("auction has ended")]
    AuctionEnded,
    #[error("bid must be higher than the current highest bid of {current_highest}")]
    BidTooLow { current_highest: i64 },
}

#[derive(Default)]
pub struct BidLedger {
    highest: DashMap<AuctionId, i64>,
}

impl BidLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the ledger entry for an auction from its stored record. A
    /// no-op when the auction is already tracked.
    pub fn prime(&self, auction: &Auction) {
        self.highest
            .entry(auction.id)
            .or_insert_with(|| auction.current_highest_amount());
    }

    /// The amount a new bid has to exceed.
    pub fn current_highest(&self, auction: &Auction) -> i64 {
        *self
            .highest
            .entry(auction.id)
            .or_insert_with(|| auction.current_highest_amount())
    }

    /// Validates a bid against the auction's lifecycle state and the
    /// recorded highest amount. Acceptance updates the ledger and stamps
    /// the bid with the server-side acceptance instant. Comparison is
    /// strict so the highest bid stays unique: equal amounts are rejected.
    pub fn try_accept_bid(
        &self,
        auction: &Auction,
        bidder: UserId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Bid, BidRejection> {
        if auction.status == AuctionStatus::Ended {
            return Err(BidRejection::AuctionEnded);
        }
        let mut entry = self
            .highest
            .entry(auction.id)
            .or_insert_with(|| auction.current_highest_amount());
        if amount <= *entry {
            return Err(BidRejection::BidTooLow {
                current_highest: *entry,
            });
        }
        *entry = amount;
        Ok(Bid {
            bidder,
            amount,
            timestamp: now,
        })
    }

    /// Drops the entry for a finalized auction.
    pub fn forget(&self, id: &AuctionId) {
        self.highest.remove(id);
    }
}
