use {
    crate::api::AppState,
    anyhow::Result,
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    model::auction::{Auction, AuctionId},
    std::{str::FromStr, sync::Arc},
};

pub async fn get_auction_by_id_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = AuctionId::from_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let result = state.auction_house.auction(&id).await;
    get_auction_by_id_response(result)
}

pub fn get_auction_by_id_response(result: Result<Option<Auction>>) -> Response {
    let auction = match result {
        Ok(auction) => auction,
        Err(err) => {
            tracing::error!(?err, "get_auction_by_id_response");
            return crate::api::internal_error_reply();
        }
    };
    match auction {
        Some(auction) => (StatusCode::OK, Json(auction)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            super::error("NotFound", "Auction was not found"),
        )
            .into_response(),
    }
}
