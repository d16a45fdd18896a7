//! Events pushed to subscribers of an auction room.
//!
//! Delivery is best-effort fan-out: subscribers that join late get a
//! point-in-time snapshot through the regular fetch API, never a replay.

use {
    crate::auction::{Auction, AuctionStatus, UserId},
    serde::{Deserialize, Serialize},
};

/// State-change events for one auction, tagged by `type` on the wire.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuctionEvent {
    #[serde(rename_all = "camelCase")]
    BidPlaced { auction: Box<Auction>, message: String },
    #[serde(rename_all = "camelCase")]
    AuctionEnding {
        countdown: u32,
        status: AuctionStatus,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    AuctionCountdown {
        countdown: u32,
        status: AuctionStatus,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    CountdownCancelled {
        countdown: Option<u32>,
        status: AuctionStatus,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auction: Option<Box<Auction>>,
    },
    #[serde(rename_all = "camelCase")]
    AuctionEnded {
        auction: Box<Auction>,
        status: AuctionStatus,
        countdown: Option<u32>,
        message: String,
    },
}

impl AuctionEvent {
    pub fn bid_placed(auction: Auction) -> Self {
        let amount = auction
            .bids
            .last()
            .map(|bid| bid.amount)
            .unwrap_or(auction.starting_price);
        Self::BidPlaced {
            auction: Box::new(auction),
            message: format!("New bid placed: ${amount}"),
        }
    }

    pub fn auction_ending(inactivity_secs: u64, countdown: u32) -> Self {
        Self::AuctionEnding {
            countdown,
            status: AuctionStatus::Ending,
            message: format!(
                "No bids for {inactivity_secs} seconds. Auction ending in {countdown} seconds!"
            ),
        }
    }

    pub fn countdown_tick(countdown: u32) -> Self {
        Self::AuctionCountdown {
            countdown,
            status: AuctionStatus::Ending,
            message: format!("Auction ending in {countdown} seconds!"),
        }
    }

    /// The reset path carries the updated auction; a countdown task that
    /// merely observes a stale status does not.
    pub fn countdown_cancelled(auction: Option<Auction>) -> Self {
        let message = if auction.is_some() {
            "New bid placed! Countdown cancelled."
        } else {
            "Countdown cancelled due to new bid."
        };
        Self::CountdownCancelled {
            countdown: None,
            status: AuctionStatus::Active,
            message: message.to_string(),
            auction: auction.map(Box::new),
        }
    }

    pub fn auction_ended(auction: Auction) -> Self {
        let message = match auction.winner {
            Some(winner) => format!("Auction has ended! Winner: {winner}"),
            None => "Auction has ended with no bids!".to_string(),
        };
        Self::AuctionEnded {
            auction: Box::new(auction),
            status: AuctionStatus::Ended,
            countdown: None,
            message,
        }
    }
}

/// Room presence notifications. These are a convenience for viewers and are
/// passed through verbatim; they carry no lifecycle state.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    #[serde(rename_all = "camelCase")]
    UserJoined { user: UserId, message: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { user: UserId, message: String },
    #[serde(rename_all = "camelCase")]
    RoomUsers { users: Vec<UserId> },
}

impl PresenceEvent {
    pub fn user_joined(user: UserId) -> Self {
        Self::UserJoined {
            user,
            message: format!("{user} joined the auction"),
        }
    }

    pub fn user_left(user: UserId) -> Self {
        Self::UserLeft {
            user,
            message: format!("{user} left the auction"),
        }
    }
}

/// Everything published on an auction's room channel.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RoomEvent {
    Auction(AuctionEvent),
    Presence(PresenceEvent),
}

impl From<AuctionEvent> for RoomEvent {
    fn from(event: AuctionEvent) -> Self {
        Self::Auction(event)
    }
}

impl From<PresenceEvent> for RoomEvent {
    fn from(event: PresenceEvent) -> Self {
        Self::Presence(event)
    }
}
