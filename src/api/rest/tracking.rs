use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;

use crate::engine::session::TrackingView;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::order::{OrderMetadata, TrackedOrder};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/track", post(track_order).delete(untrack_order))
        .route("/orders/:id/tracking", get(get_tracking))
}

#[derive(Deserialize)]
pub struct TrackOrderRequest {
    pub store: GeoPoint,
    pub customer: GeoPoint,
    pub agent: Option<GeoPoint>,
    pub metadata: OrderMetadata,
}

async fn track_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<TrackOrderRequest>,
) -> Result<Json<TrackingView>, AppError> {
    if id.trim().is_empty() {
        return Err(AppError::BadRequest("order id cannot be empty".to_string()));
    }

    for (name, point) in [("store", &payload.store), ("customer", &payload.customer)]
        .into_iter()
        .chain(payload.agent.as_ref().map(|agent| ("agent", agent)))
    {
        if !point.is_valid() {
            return Err(AppError::BadRequest(format!("{name} is not a valid coordinate")));
        }
    }

    let mut metadata = payload.metadata;
    metadata.partner.rating = metadata.partner.rating.clamp(0.0, 5.0);

    let mut order = TrackedOrder::new(id, payload.store, payload.customer, metadata);
    if let Some(agent) = payload.agent {
        order = order.with_agent(agent);
    }

    let session = state.track(order);
    Ok(Json(session.view()))
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TrackingView>, AppError> {
    let session = state
        .session(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} is not tracked", id)))?;

    Ok(Json(session.view()))
}

async fn untrack_order(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    state.untrack(&id);
    StatusCode::NO_CONTENT
}
