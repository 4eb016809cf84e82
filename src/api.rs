/// Lookup API
///
/// Read-only HTTP access to the promotions table.
use crate::db::PromotionStore;
use crate::models::PromotionResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

pub type SharedStore = Arc<dyn PromotionStore>;

/// Create promotion routes
pub fn promotion_routes(store: SharedStore) -> Router {
    Router::new().route("/promotions/:id", get(get_promotion)).with_state(store)
}

/// Get a promotion by ID
///
/// GET /promotions/:id
async fn get_promotion(State(store): State<SharedStore>, Path(id): Path<String>) -> Result<Response, StatusCode> {
    match store.find_by_id(&id).await {
        Ok(Some(promotion)) => Ok((StatusCode::OK, Json(PromotionResponse::from(promotion))).into_response()),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to look up promotion {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
