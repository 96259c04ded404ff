use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::EventChannel;
use crate::error::EventError;
use crate::models::events::{UPDATE_LOCATION, UPDATE_STATUS, location_channel, status_channel};
use crate::observability::metrics::Metrics;

/// Forwards producer emits to the per-order channels observers listen on.
pub fn spawn_relay(channel: Arc<dyn EventChannel>, metrics: Metrics) -> JoinHandle<()> {
    let mut location = channel.subscribe(UPDATE_LOCATION);
    let mut status = channel.subscribe(UPDATE_STATUS);

    tokio::spawn(async move {
        info!("event relay started");

        loop {
            // Location first: a producer tick emits its fix before any phase change.
            let (kind, received) = tokio::select! {
                biased;
                received = location.receiver.recv() => (UPDATE_LOCATION, received),
                received = status.receiver.recv() => (UPDATE_STATUS, received),
            };

            let payload = match received {
                Ok(payload) => payload,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = kind, skipped, "relay lagged behind producer channel");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match relay_one(channel.as_ref(), kind, payload) {
                Ok((target, delivered)) => {
                    debug!(channel = kind, target = %target, delivered, "event relayed");
                    metrics.record_relay(kind, "relayed");
                }
                Err(err) => {
                    warn!(channel = kind, error = %err, "producer emit dropped");
                    metrics.record_relay(kind, "dropped");
                }
            }
        }

        channel.unsubscribe(&location.handle);
        channel.unsubscribe(&status.handle);
        warn!("event relay stopped: producer channel closed");
    })
}

/// Strips `orderId` and republishes the rest on the order's channel.
pub fn relay_one(
    channel: &dyn EventChannel,
    kind: &str,
    payload: Value,
) -> Result<(String, usize), EventError> {
    let Value::Object(mut fields) = payload else {
        return Err(EventError::Malformed("payload is not an object".to_string()));
    };

    let order_id = match fields.remove("orderId") {
        Some(Value::String(id)) if !id.is_empty() => id,
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(EventError::MissingOrderId),
    };

    let target = if kind == UPDATE_LOCATION {
        location_channel(&order_id)
    } else {
        status_channel(&order_id)
    };

    let delivered = channel.publish(&target, Value::Object(fields));
    Ok((target, delivered))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::channel::ChannelHub;

    #[test]
    fn relay_one_strips_order_id() {
        let hub = ChannelHub::new(8);
        let mut sub = hub.subscribe("location-12345");

        let (target, delivered) = relay_one(
            &hub,
            UPDATE_LOCATION,
            json!({ "orderId": "12345", "latitude": 28.6, "longitude": 77.2 }),
        )
        .unwrap();

        assert_eq!(target, "location-12345");
        assert_eq!(delivered, 1);
        assert_eq!(
            sub.receiver.try_recv().unwrap(),
            json!({ "latitude": 28.6, "longitude": 77.2 })
        );
    }

    #[test]
    fn numeric_order_ids_are_accepted() {
        let hub = ChannelHub::new(8);
        let (target, _) =
            relay_one(&hub, UPDATE_STATUS, json!({ "orderId": 42, "status": "pickup" })).unwrap();
        assert_eq!(target, "status-42");
    }

    #[test]
    fn missing_order_id_is_dropped() {
        let hub = ChannelHub::new(8);
        assert_eq!(
            relay_one(&hub, UPDATE_STATUS, json!({ "status": "pickup" })),
            Err(EventError::MissingOrderId)
        );
        assert!(matches!(
            relay_one(&hub, UPDATE_STATUS, json!([1, 2])),
            Err(EventError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn spawned_relay_forwards_status() {
        let hub = Arc::new(ChannelHub::new(8));
        let _relay = spawn_relay(hub.clone(), Metrics::new());
        let mut sub = hub.subscribe("status-9");

        hub.publish(
            UPDATE_STATUS,
            json!({ "orderId": "9", "status": "delivering", "estimatedTime": 15 }),
        );

        let received = timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, json!({ "status": "delivering", "estimatedTime": 15 }));
    }
}
