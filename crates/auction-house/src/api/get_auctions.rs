use {
    crate::{api::AppState, auction_house::AuctionListing},
    anyhow::Result,
    axum::{
        extract::{Query, State},
        http::{HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    model::auction::{AuctionFilter, AuctionStatus, SortField, SortOrder, UserId},
    serde::Deserialize,
    std::sync::Arc,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub seller: Option<UserId>,
    pub status: Option<AuctionStatus>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl From<ListQuery> for AuctionFilter {
    fn from(query: ListQuery) -> Self {
        let default = AuctionFilter::default();
        AuctionFilter {
            seller: query.seller,
            status: query.status,
            sort: query.sort.unwrap_or(default.sort),
            order: query.order.unwrap_or(default.order),
            page: query.page.unwrap_or(default.page),
            limit: query.limit.unwrap_or(default.limit),
        }
    }
}

pub async fn get_auctions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let result = state.auction_house.auctions(query.into()).await;
    get_auctions_response(result)
}

pub fn get_auctions_response(result: Result<AuctionListing>) -> Response {
    let listing = match result {
        Ok(listing) => listing,
        Err(err) => {
            tracing::error!(?err, "get_auctions_response");
            return crate::api::internal_error_reply();
        }
    };
    let mut response = (StatusCode::OK, Json(listing.auctions)).into_response();
    let headers = response.headers_mut();
    headers.insert("x-total-count", HeaderValue::from(listing.total_count));
    headers.insert("x-total-pages", HeaderValue::from(listing.total_pages));
    headers.insert("x-current-page", HeaderValue::from(listing.page));
    response
}
