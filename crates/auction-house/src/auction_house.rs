//! Service facade composing the ledger, lifecycle, store and broadcaster
//! into the public operations of the engine.

use {
    crate::{
        database::auctions::{AuctionStoring, InsertionError},
        events::Broadcaster,
        ledger::{BidLedger, BidRejection},
        lifecycle::Lifecycle,
    },
    anyhow::Result,
    chrono::Utc,
    model::{
        auction::{
            Auction, AuctionFilter, AuctionId, AuctionStatus, CreateAuctionRequest, UserId,
            ValidationError,
        },
        event::AuctionEvent,
    },
    std::{sync::Arc, time::Duration},
};

#[derive(prometheus_metric_storage::MetricStorage, Clone, Debug)]
#[metric(subsystem = "auction_house")]
struct Metrics {
    /// Number of auctions created.
    auctions_created: prometheus::IntCounter,

    /// Number of accepted bids.
    bids_accepted: prometheus::IntCounter,

    /// Number of rejected bids by reason.
    #[metric(labels("reason"))]
    bids_rejected: prometheus::IntCounterVec,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
}

#[derive(Debug, thiserror::Error)]
pub enum CreateAuctionError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("duplicated auction")]
    Duplicated,
    #[error("database error: {0}")]
    Database(anyhow::Error),
}

impl From<InsertionError> for CreateAuctionError {
    fn from(err: InsertionError) -> Self {
        match err {
            InsertionError::DuplicatedRecord => Self::Duplicated,
            InsertionError::Storage(err) => Self::Database(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceBidError {
    #[error("auction not found")]
    NotFound,
    #[error("auction has ended")]
    AuctionEnded,
    #[error("bid must be higher than the current highest bid of {current_highest}")]
    BidTooLow { current_highest: i64 },
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<BidRejection> for PlaceBidError {
    fn from(rejection: BidRejection) -> Self {
        match rejection {
            BidRejection::AuctionEnded => Self::AuctionEnded,
            BidRejection::BidTooLow { current_highest } => Self::BidTooLow { current_highest },
        }
    }
}

/// One page of a listing plus the pagination totals exposed to clients.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuctionListing {
    pub auctions: Vec<Auction>,
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
}

pub struct AuctionHouse {
    store: Arc<dyn AuctionStoring>,
    ledger: Arc<BidLedger>,
    lifecycle: Arc<Lifecycle>,
    broadcaster: Arc<Broadcaster>,
    storage_timeout: Duration,
}

impl AuctionHouse {
    pub fn new(
        store: Arc<dyn AuctionStoring>,
        ledger: Arc<BidLedger>,
        lifecycle: Arc<Lifecycle>,
        broadcaster: Arc<Broadcaster>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            lifecycle,
            broadcaster,
            storage_timeout,
        }
    }

    pub async fn create(
        &self,
        request: CreateAuctionRequest,
    ) -> Result<Auction, CreateAuctionError> {
        request.validate()?;
        let auction = request.into_auction(Utc::now());
        self.bounded(self.store.insert_auction(&auction))
            .await
            .map_err(CreateAuctionError::Database)??;
        self.ledger.prime(&auction);
        self.lifecycle
            .rearm_inactivity(auction.id, auction.last_activity());
        metrics().auctions_created.inc();
        tracing::debug!(auction = %auction.id, seller = %auction.seller, "auction created");
        Ok(auction)
    }

    pub async fn auctions(&self, filter: AuctionFilter) -> Result<AuctionListing> {
        let filter = filter.normalized();
        let page = self.bounded(self.store.auctions(&filter)).await??;
        let total_pages = page.total_count.div_ceil(u64::from(filter.limit));
        Ok(AuctionListing {
            auctions: page.auctions,
            total_count: page.total_count,
            total_pages,
            page: filter.page,
        })
    }

    pub async fn auction(&self, id: &AuctionId) -> Result<Option<Auction>> {
        self.bounded(self.store.single_auction(id)).await?
    }

    /// Accepts or rejects a bid. Acceptance appends the bid, moves the
    /// auction back to active when it was ending, persists, and announces
    /// the bid. The broadcast is outside the consistency boundary: its
    /// failure never revokes an accepted bid.
    pub async fn place_bid(
        &self,
        id: AuctionId,
        bidder: UserId,
        amount: i64,
    ) -> Result<Auction, PlaceBidError> {
        let _guard = self.lifecycle.lock(id).await;
        let auction = self
            .bounded(self.store.single_auction(&id))
            .await
            .map_err(PlaceBidError::Database)?
            .map_err(PlaceBidError::Database)?
            .ok_or(PlaceBidError::NotFound)?;
        let bid = self
            .ledger
            .try_accept_bid(&auction, bidder, amount, Utc::now())
            .inspect_err(|rejection| {
                metrics()
                    .bids_rejected
                    .with_label_values(&[match rejection {
                        BidRejection::AuctionEnded => "auction_ended",
                        BidRejection::BidTooLow { .. } => "bid_too_low",
                    }])
                    .inc();
            })?;
        let was_ending = auction.status == AuctionStatus::Ending;
        if was_ending {
            // Stop the countdown before the write goes out so no tick can
            // finalize the auction while the bid is in flight.
            self.lifecycle.cancel_countdown(&id);
        }
        let updated = match self
            .bounded(self.store.append_bid(&id, &bid, AuctionStatus::Active))
            .await
            .and_then(|inner| inner)
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                self.ledger.forget(&id);
                return Err(PlaceBidError::NotFound);
            }
            Err(err) => {
                // The ledger already recorded the amount; drop the entry so
                // the next bid re-derives from the store instead of chasing
                // a phantom highest bid.
                self.ledger.forget(&id);
                tracing::warn!(auction = %id, ?err, "failed to persist bid");
                return Err(PlaceBidError::Database(err));
            }
        };
        if was_ending {
            self.lifecycle.resume_active(&updated);
        } else {
            self.lifecycle.rearm_inactivity(id, updated.last_activity());
        }
        self.broadcaster
            .publish(&id, AuctionEvent::bid_placed(updated.clone()));
        metrics().bids_accepted.inc();
        tracing::debug!(auction = %id, bidder = %bidder, amount, "bid accepted");
        Ok(updated)
    }

    async fn bounded<T>(&self, operation: impl std::future::Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| anyhow::anyhow!("storage operation timed out"))
    }
}
