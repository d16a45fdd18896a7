use {
    crate::{
        api::{AppState, error},
        auction_house::CreateAuctionError,
    },
    axum::{
        body,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    model::auction::CreateAuctionRequest,
    std::sync::Arc,
};

pub async fn post_auction_handler(
    State(state): State<Arc<AppState>>,
    body: body::Bytes,
) -> Response {
    let request = match serde_json::from_slice::<CreateAuctionRequest>(&body) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    match state.auction_house.create(request).await {
        Ok(auction) => {
            tracing::debug!(auction = %auction.id, "auction created");
            (StatusCode::CREATED, Json(auction)).into_response()
        }
        Err(err) => {
            tracing::debug!(?err, "error creating auction");
            err.into_response()
        }
    }
}

impl IntoResponse for CreateAuctionError {
    fn into_response(self) -> Response {
        match self {
            CreateAuctionError::Validation(err) => {
                (StatusCode::BAD_REQUEST, error("ValidationError", err.to_string()))
                    .into_response()
            }
            CreateAuctionError::Duplicated => (
                StatusCode::BAD_REQUEST,
                error("DuplicatedAuction", "auction with this id already exists"),
            )
                .into_response(),
            CreateAuctionError::Database(err) => {
                tracing::error!(?err, "create auction failed");
                crate::api::internal_error_reply()
            }
        }
    }
}
