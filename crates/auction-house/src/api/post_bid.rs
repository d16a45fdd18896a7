use {
    crate::{
        api::{AppState, error, rich_error},
        auction_house::PlaceBidError,
    },
    axum::{
        body,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    model::auction::{AuctionId, UserId},
    serde::{Deserialize, Serialize},
    std::{str::FromStr, sync::Arc},
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidPayload {
    pub bidder: UserId,
    pub amount: i64,
}

pub async fn post_bid_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: body::Bytes,
) -> Response {
    let Ok(id) = AuctionId::from_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let payload = match serde_json::from_slice::<BidPayload>(&body) {
        Ok(payload) => payload,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    match state
        .auction_house
        .place_bid(id, payload.bidder, payload.amount)
        .await
    {
        Ok(auction) => {
            tracing::debug!(auction = %id, amount = payload.amount, "bid placed");
            (StatusCode::OK, Json(auction)).into_response()
        }
        Err(err) => {
            tracing::debug!(auction = %id, ?err, "bid rejected");
            err.into_response()
        }
    }
}

impl IntoResponse for PlaceBidError {
    fn into_response(self) -> Response {
        match self {
            PlaceBidError::NotFound => (
                StatusCode::NOT_FOUND,
                error("NotFound", "Auction was not found"),
            )
                .into_response(),
            PlaceBidError::AuctionEnded => (
                StatusCode::BAD_REQUEST,
                error("AuctionEnded", "Auction has ended"),
            )
                .into_response(),
            PlaceBidError::BidTooLow { current_highest } => (
                StatusCode::BAD_REQUEST,
                rich_error(
                    "BidTooLow",
                    format!("Bid must be higher than current highest bid of {current_highest}"),
                    serde_json::json!({ "currentHighestBid": current_highest }),
                ),
            )
                .into_response(),
            PlaceBidError::Database(err) => {
                tracing::error!(?err, "place bid failed");
                crate::api::internal_error_reply()
            }
        }
    }
}
