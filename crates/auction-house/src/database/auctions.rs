//! Storage contract for auction records.
//!
//! The engine treats the store as an opaque durable collection with atomic
//! read and update-by-id operations. Status transitions are compare-and-set
//! so racing writers observe a conflict instead of clobbering each other.

use {
    anyhow::Result,
    model::auction::{Auction, AuctionFilter, AuctionId, AuctionStatus, Bid, UserId},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuctionStoring: Send + Sync {
    async fn insert_auction(&self, auction: &Auction) -> Result<(), InsertionError>;

    async fn single_auction(&self, id: &AuctionId) -> Result<Option<Auction>>;

    /// One page of auctions matching the filter, plus the total match count
    /// before pagination.
    async fn auctions(&self, filter: &AuctionFilter) -> Result<AuctionPage>;

    /// All auctions that still accept bids (active or ending). Used by the
    /// periodic sweep.
    async fn open_auctions(&self) -> Result<Vec<Auction>>;

    /// Atomically appends a bid, moves the last bid time to the bid's
    /// timestamp and sets the status. Returns the updated record, or `None`
    /// for an unknown id.
    async fn append_bid(
        &self,
        id: &AuctionId,
        bid: &Bid,
        status: AuctionStatus,
    ) -> Result<Option<Auction>>;

    /// Compare-and-set on the status field.
    async fn update_status(
        &self,
        id: &AuctionId,
        expected: AuctionStatus,
        new: AuctionStatus,
    ) -> Result<StatusUpdate>;

    /// Marks the auction ended and records the winner, unless it already is
    /// ended.
    async fn finalize_auction(
        &self,
        id: &AuctionId,
        winner: Option<UserId>,
    ) -> Result<Finalization>;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuctionPage {
    pub auctions: Vec<Auction>,
    pub total_count: u64,
}

/// Outcome of a status compare-and-set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusUpdate {
    Updated(Auction),
    /// The stored status did not match the expected one. Carries the record
    /// as it is so the caller can re-derive.
    Conflict(Auction),
    NotFound,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Finalization {
    Finalized(Auction),
    AlreadyEnded,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum InsertionError {
    #[error("duplicated auction")]
    DuplicatedRecord,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
