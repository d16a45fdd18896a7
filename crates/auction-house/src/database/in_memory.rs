//! Reference [`AuctionStoring`] implementation backed by a process-local
//! table. Every operation holds the table lock for its full duration, which
//! gives the same atomic read/update-by-id semantics a durable store would
//! provide.

use {
    super::auctions::{AuctionPage, AuctionStoring, Finalization, InsertionError, StatusUpdate},
    anyhow::Result,
    model::auction::{
        Auction, AuctionFilter, AuctionId, AuctionStatus, Bid, SortField, SortOrder, UserId,
    },
    std::{cmp::Ordering, collections::HashMap},
    tokio::sync::RwLock,
};

#[derive(Default)]
pub struct InMemory {
    auctions: RwLock<HashMap<AuctionId, Auction>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compare(a: &Auction, b: &Auction, field: SortField) -> Ordering {
    let ordering = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::StartingPrice => a.starting_price.cmp(&b.starting_price),
        SortField::StartDateTime => a.start_date_time.cmp(&b.start_date_time),
        SortField::EndDateTime => a.end_date_time.cmp(&b.end_date_time),
    };
    // Equal keys fall back to the id so pages are stable across calls.
    ordering.then_with(|| a.id.cmp(&b.id))
}

#[async_trait::async_trait]
impl AuctionStoring for InMemory {
    async fn insert_auction(&self, auction: &Auction) -> Result<(), InsertionError> {
        let mut auctions = self.auctions.write().await;
        if auctions.contains_key(&auction.id) {
            return Err(InsertionError::DuplicatedRecord);
        }
        auctions.insert(auction.id, auction.clone());
        Ok(())
    }

    async fn single_auction(&self, id: &AuctionId) -> Result<Option<Auction>> {
        Ok(self.auctions.read().await.get(id).cloned())
    }

    async fn auctions(&self, filter: &AuctionFilter) -> Result<AuctionPage> {
        let auctions = self.auctions.read().await;
        let mut matching: Vec<&Auction> = auctions
            .values()
            .filter(|auction| {
                filter.seller.is_none_or(|seller| auction.seller == seller)
                    && filter.status.is_none_or(|status| auction.status == status)
            })
            .collect();
        matching.sort_by(|a, b| {
            let ordering = compare(a, b, filter.sort);
            match filter.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        let total_count = matching.len() as u64;
        let offset = (filter.page.saturating_sub(1) * filter.limit) as usize;
        let auctions = matching
            .into_iter()
            .skip(offset)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok(AuctionPage {
            auctions,
            total_count,
        })
    }

    async fn open_auctions(&self) -> Result<Vec<Auction>> {
        Ok(self
            .auctions
            .read()
            .await
            .values()
            .filter(|auction| auction.status != AuctionStatus::Ended)
            .cloned()
            .collect())
    }

    async fn append_bid(
        &self,
        id: &AuctionId,
        bid: &Bid,
        status: AuctionStatus,
    ) -> Result<Option<Auction>> {
        let mut auctions = self.auctions.write().await;
        let Some(auction) = auctions.get_mut(id) else {
            return Ok(None);
        };
        auction.bids.push(bid.clone());
        auction.last_bid_time = Some(bid.timestamp);
        auction.status = status;
        Ok(Some(auction.clone()))
    }

    async fn update_status(
        &self,
        id: &AuctionId,
        expected: AuctionStatus,
        new: AuctionStatus,
    ) -> Result<StatusUpdate> {
        let mut auctions = self.auctions.write().await;
        let Some(auction) = auctions.get_mut(id) else {
            return Ok(StatusUpdate::NotFound);
        };
        if auction.status != expected {
            return Ok(StatusUpdate::Conflict(auction.clone()));
        }
        auction.status = new;
        Ok(StatusUpdate::Updated(auction.clone()))
    }

    async fn finalize_auction(
        &self,
        id: &AuctionId,
        winner: Option<UserId>,
    ) -> Result<Finalization> {
        let mut auctions = self.auctions.write().await;
        let Some(auction) = auctions.get_mut(id) else {
            return Ok(Finalization::NotFound);
        };
        if auction.status == AuctionStatus::Ended {
            return Ok(Finalization::AlreadyEnded);
        }
        auction.status = AuctionStatus::Ended;
        auction.winner = winner;
        Ok(Finalization::Finalized(auction.clone()))
    }
}
