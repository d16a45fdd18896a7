//! Auction listing and bid types.
//!
//! Amounts are whole units of a single currency. The engine never does
//! arithmetic beyond comparisons so a plain `i64` is sufficient.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{
        fmt::{self, Display},
        str::FromStr,
    },
    uuid::Uuid,
};

/// Opaque identifier of an auction.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct AuctionId(pub Uuid);

impl AuctionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

impl FromStr for AuctionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Opaque reference to a user managed by the external account system.
/// Sellers, bidders and winners are all user references.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of an auction. Transitions only move forward except for
/// the ending -> active reset on a new bid; ended is terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AuctionStatus {
    #[default]
    Active,
    Ending,
    Ended,
}

/// A single accepted bid. The timestamp is assigned by the server at the
/// instant of acceptance, never taken from the client.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub bidder: UserId,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// An auction as returned by the API and stored by the engine.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: AuctionId,
    pub product_name: String,
    pub description: String,
    pub image_url: String,
    pub starting_price: i64,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub seller: UserId,
    /// Insertion order is chronological order of acceptance.
    #[serde(default)]
    pub bids: Vec<Bid>,
    pub last_bid_time: Option<DateTime<Utc>>,
    pub winner: Option<UserId>,
    pub status: AuctionStatus,
    pub created_at: DateTime<Utc>,
}

impl Auction {
    /// The amount a new bid has to exceed: the highest recorded bid, or the
    /// starting price while there are none.
    pub fn current_highest_amount(&self) -> i64 {
        self.bids
            .iter()
            .map(|bid| bid.amount)
            .max()
            .unwrap_or(self.starting_price)
    }

    /// The maximum-amount bid. Ties are broken by the earliest timestamp,
    /// which in insertion order means the first occurrence wins, so only a
    /// strictly greater amount displaces the current maximum.
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.bids.iter().fold(None, |highest, bid| match highest {
            Some(current) if bid.amount <= current.amount => Some(current),
            _ => Some(bid),
        })
    }

    /// The instant inactivity is measured from: the last accepted bid, or
    /// the start of the auction while there are none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_bid_time.unwrap_or(self.start_date_time)
    }
}

/// Payload for creating a new auction.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuctionRequest {
    pub product_name: String,
    pub description: String,
    pub image_url: String,
    pub starting_price: i64,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub seller: UserId,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("starting price must be greater than zero")]
    NonPositiveStartingPrice,
    #[error("end date must be after start date")]
    EndNotAfterStart,
}

impl CreateAuctionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("productName", &self.product_name),
            ("description", &self.description),
            ("imageUrl", &self.image_url),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }
        if self.starting_price <= 0 {
            return Err(ValidationError::NonPositiveStartingPrice);
        }
        if self.end_date_time <= self.start_date_time {
            return Err(ValidationError::EndNotAfterStart);
        }
        Ok(())
    }

    /// Builds the stored auction record. New auctions start out active with
    /// their inactivity clock anchored at the start time.
    pub fn into_auction(self, now: DateTime<Utc>) -> Auction {
        Auction {
            id: AuctionId::random(),
            product_name: self.product_name,
            description: self.description,
            image_url: self.image_url,
            starting_price: self.starting_price,
            start_date_time: self.start_date_time,
            end_date_time: self.end_date_time,
            seller: self.seller,
            bids: Vec::new(),
            last_bid_time: Some(self.start_date_time),
            winner: None,
            status: AuctionStatus::Active,
            created_at: now,
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    StartingPrice,
    StartDateTime,
    EndDateTime,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, strum::EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 50;

/// Filter, sort and pagination for listing auctions. Defaults to newest
/// first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuctionFilter {
    pub seller: Option<UserId>,
    pub status: Option<AuctionStatus>,
    pub sort: SortField,
    pub order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

impl Default for AuctionFilter {
    fn default() -> Self {
        Self {
            seller: None,
            status: None,
            sort: SortField::default(),
            order: SortOrder::default(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AuctionFilter {
    /// Clamps pagination to the supported range: pages start at 1 and an
    /// out-of-range limit falls back to the default page size.
    pub fn normalized(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.limit < 1 || self.limit > MAX_PAGE_SIZE {
            self.limit = DEFAULT_PAGE_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn auction() -> Auction {
        Auction {
            id: AuctionId(Uuid::from_u128(1)),
            product_name: "vintage camera".to_string(),
            description: "working condition".to_string(),
            image_url: "https://img.example/camera.jpg".to_string(),
            starting_price: 100,
            start_date_time: "2023-05-01T12:00:00Z".parse().unwrap(),
            end_date_time: "2023-05-02T12:00:00Z".parse().unwrap(),
            seller: UserId(Uuid::from_u128(2)),
            bids: Vec::new(),
            last_bid_time: Some("2023-05-01T12:00:00Z".parse().unwrap()),
            winner: None,
            status: AuctionStatus::Active,
            created_at: "2023-05-01T11:59:00Z".parse().unwrap(),
        }
    }

    fn bid(bidder: u128, amount: i64, timestamp: &str) -> Bid {
        Bid {
            bidder: UserId(Uuid::from_u128(bidder)),
            amount,
            timestamp: timestamp.parse().unwrap(),
        }
    }

    #[test]
    fn roundtrips_auction() {
        let auction = auction();
        assert_eq!(
            serde_json::to_value(&auction).unwrap(),
            json!({
                "id": "00000000-0000-0000-0000-000000000001",
                "productName": "vintage camera",
                "description": "working condition",
                "imageUrl": "https://img.example/camera.jpg",
                "startingPrice": 100,
                "startDateTime": "2023-05-01T12:00:00Z",
                "endDateTime": "2023-05-02T12:00:00Z",
                "seller": "00000000-0000-0000-0000-000000000002",
                "bids": [],
                "lastBidTime": "2023-05-01T12:00:00Z",
                "winner": null,
                "status": "active",
                "createdAt": "2023-05-01T11:59:00Z",
            }),
        );
        let deserialized: Auction =
            serde_json::from_value(serde_json::to_value(&auction).unwrap()).unwrap();
        assert_eq!(deserialized, auction);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(AuctionStatus::Ending).unwrap(),
            json!("ending")
        );
        assert_eq!("ended".parse::<AuctionStatus>().unwrap(), AuctionStatus::Ended);
    }

    #[test]
    fn highest_amount_is_starting_price_without_bids() {
        assert_eq!(auction().current_highest_amount(), 100);
        assert_eq!(auction().highest_bid(), None);
    }

    #[test]
    fn highest_bid_breaks_ties_by_earliest_timestamp() {
        let mut auction = auction();
        auction.bids = vec![
            bid(10, 150, "2023-05-01T12:01:00Z"),
            bid(11, 200, "2023-05-01T12:02:00Z"),
            bid(12, 200, "2023-05-01T12:03:00Z"),
            bid(13, 180, "2023-05-01T12:04:00Z"),
        ];
        let highest = auction.highest_bid().unwrap();
        assert_eq!(highest.bidder, UserId(Uuid::from_u128(11)));
        assert_eq!(auction.current_highest_amount(), 200);
    }

    #[test]
    fn validates_create_request() {
        let request = CreateAuctionRequest {
            product_name: "lamp".to_string(),
            description: "brass".to_string(),
            image_url: "https://img.example/lamp.jpg".to_string(),
            starting_price: 25,
            start_date_time: "2023-05-01T12:00:00Z".parse().unwrap(),
            end_date_time: "2023-05-02T12:00:00Z".parse().unwrap(),
            seller: UserId::random(),
        };
        assert_eq!(request.validate(), Ok(()));

        let missing = CreateAuctionRequest {
            product_name: "  ".to_string(),
            ..request.clone()
        };
        assert_eq!(
            missing.validate(),
            Err(ValidationError::MissingField("productName"))
        );

        let free = CreateAuctionRequest {
            starting_price: 0,
            ..request.clone()
        };
        assert_eq!(free.validate(), Err(ValidationError::NonPositiveStartingPrice));

        let inverted = CreateAuctionRequest {
            end_date_time: request.start_date_time,
            ..request.clone()
        };
        assert_eq!(inverted.validate(), Err(ValidationError::EndNotAfterStart));
    }

    #[test]
    fn new_auctions_anchor_activity_at_start_time() {
        let request = CreateAuctionRequest {
            product_name: "lamp".to_string(),
            description: "brass".to_string(),
            image_url: "https://img.example/lamp.jpg".to_string(),
            starting_price: 25,
            start_date_time: "2023-05-01T12:00:00Z".parse().unwrap(),
            end_date_time: "2023-05-02T12:00:00Z".parse().unwrap(),
            seller: UserId::random(),
        };
        let auction = request.clone().into_auction(Utc::now());
        assert_eq!(auction.status, AuctionStatus::Active);
        assert_eq!(auction.last_bid_time, Some(request.start_date_time));
        assert_eq!(auction.last_activity(), request.start_date_time);
        assert!(auction.bids.is_empty());
        assert_eq!(auction.winner, None);
    }

    #[test]
    fn normalizes_pagination() {
        let filter = AuctionFilter {
            page: 0,
            limit: 500,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);

        let filter = AuctionFilter {
            page: 3,
            limit: 50,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.page, 3);
        assert_eq!(filter.limit, 50);
    }
}
