use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::engine::session::TrackingView;
use crate::engine::tracking::TrackingState;
use crate::error::AppError;
use crate::models::events::ProducerMessage;
use crate::models::order::TrackedOrder;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .session(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} is not tracked", id)))?;
    let updates = session
        .updates()
        .ok_or_else(|| AppError::NotFound(format!("order {} is not tracked", id)))?;
    let order = session.order().clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, order, updates)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    order: TrackedOrder,
    updates: watch::Receiver<TrackingState>,
) {
    let (mut sender, mut receiver) = socket.split();
    let order_id = order.order_id.clone();

    info!(order_id = %order_id, "websocket observer connected");

    let mut send_task = tokio::spawn(async move {
        let initial = updates.borrow().clone();
        let mut changes = WatchStream::from_changes(updates);
        let mut next = Some(initial);

        while let Some(snapshot) = next {
            let view = TrackingView::build(&order, &snapshot, Utc::now());
            let json = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracking view for ws");
                    next = changes.next().await;
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            next = changes.next().await;
        }
    });

    let producer_order_id = order_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };

            let published = match serde_json::from_str::<ProducerMessage>(&text) {
                Ok(ProducerMessage::UpdateLocation(payload)) => {
                    state.publish_location(&producer_order_id, payload)
                }
                Ok(ProducerMessage::UpdateStatus(update)) => {
                    state.publish_status(&producer_order_id, update)
                }
                Err(err) => Err(AppError::BadRequest(err.to_string())),
            };

            if let Err(err) = published {
                warn!(order_id = %producer_order_id, error = %err, "producer frame dropped");
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(order_id = %order_id, "websocket observer disconnected");
}
