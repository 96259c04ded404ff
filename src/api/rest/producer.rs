use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use serde::Serialize;

use crate::error::AppError;
use crate::models::events::{LocationPayload, StatusUpdate};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/location", post(update_location))
        .route("/orders/:id/status", post(update_status))
        .route(
            "/simulate-delivery/:id",
            post(simulate_delivery).delete(stop_delivery),
        )
}

#[derive(Serialize)]
pub struct PublishAck {
    pub published: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationAck {
    pub message: &'static str,
    pub order_id: String,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<LocationPayload>,
) -> Result<(StatusCode, Json<PublishAck>), AppError> {
    let published = state.publish_location(&id, payload)?;
    Ok((StatusCode::ACCEPTED, Json(PublishAck { published })))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<StatusUpdate>,
) -> Result<(StatusCode, Json<PublishAck>), AppError> {
    let published = state.publish_status(&id, payload)?;
    Ok((StatusCode::ACCEPTED, Json(PublishAck { published })))
}

async fn simulate_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationAck>, AppError> {
    state.start_simulation(&id)?;

    Ok(Json(SimulationAck {
        message: "Delivery simulation started",
        order_id: id,
    }))
}

/// Takes the producer offline. The order stays tracked.
async fn stop_delivery(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    state.stop_simulation(&id);
    StatusCode::NO_CONTENT
}
