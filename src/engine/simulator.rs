use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::channel::EventChannel;
use crate::error::EventError;
use crate::geo::GeoPoint;
use crate::models::events::{
    LocationPayload, StatusPayload, UPDATE_LOCATION, UPDATE_STATUS, UpdateLocation, UpdateStatus,
    to_value,
};
use crate::models::phase::DeliveryPhase;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub interval: Duration,
    pub jitter_deg: f64,
    pub ticks_per_phase: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
            jitter_deg: 0.001,
            ticks_per_phase: 6,
        }
    }
}

/// The delivery agent's side of one order: where it is, what phase it reports.
pub struct CourierProducer {
    order_id: String,
    location: GeoPoint,
    phase: DeliveryPhase,
    channel: Arc<dyn EventChannel>,
}

impl CourierProducer {
    pub fn new(
        order_id: impl Into<String>,
        location: GeoPoint,
        phase: DeliveryPhase,
        channel: Arc<dyn EventChannel>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            location,
            phase,
            channel,
        }
    }

    pub fn location(&self) -> GeoPoint {
        self.location
    }

    /// Shifts the position by up to half of `jitter_deg` on each axis.
    pub fn perturb(&mut self, jitter_deg: f64) {
        let next = GeoPoint::new(
            self.location.lat + (rand::random::<f64>() - 0.5) * jitter_deg,
            self.location.lng + (rand::random::<f64>() - 0.5) * jitter_deg,
        );
        if next.is_valid() {
            self.location = next;
        }
    }

    pub fn publish_location(&self) -> Result<usize, EventError> {
        let update = UpdateLocation {
            order_id: self.order_id.clone(),
            payload: LocationPayload {
                latitude: self.location.lat,
                longitude: self.location.lng,
                status: Some(self.phase.key().to_string()),
                estimated_time: Some(i64::from(self.phase.default_eta_minutes())),
            },
        };
        Ok(self.channel.publish(UPDATE_LOCATION, to_value(&update)?))
    }

    /// Explicit phase change, published independently of the location timer.
    pub fn change_phase(&mut self, phase: DeliveryPhase) -> Result<usize, EventError> {
        self.phase = phase;
        let update = UpdateStatus {
            order_id: self.order_id.clone(),
            payload: StatusPayload {
                status: phase.key().to_string(),
                estimated_time: i64::from(phase.default_eta_minutes()),
            },
        };
        Ok(self.channel.publish(UPDATE_STATUS, to_value(&update)?))
    }
}

pub struct SimulationHandle {
    order_id: String,
    task: JoinHandle<()>,
}

impl SimulationHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            info!(order_id = %self.order_id, "delivery simulation stopped");
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drives a producer from pickup to delivered, one position fix per tick.
pub fn spawn_simulation(
    channel: Arc<dyn EventChannel>,
    order_id: &str,
    start: GeoPoint,
    settings: SimulationSettings,
) -> SimulationHandle {
    let mut producer = CourierProducer::new(order_id, start, DeliveryPhase::Pickup, channel);
    let ticks_per_phase = settings.ticks_per_phase.max(1);

    let task = tokio::spawn(async move {
        info!(order_id = %producer.order_id, "delivery simulation started");
        if let Err(err) = producer.change_phase(DeliveryPhase::Pickup) {
            warn!(order_id = %producer.order_id, error = %err, "failed to publish status");
        }

        let mut ticker = interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut ticks_in_phase = 0;
        loop {
            ticker.tick().await;

            producer.perturb(settings.jitter_deg);
            match producer.publish_location() {
                Ok(delivered) => debug!(
                    order_id = %producer.order_id,
                    lat = producer.location.lat,
                    lng = producer.location.lng,
                    delivered,
                    "simulated location published"
                ),
                Err(err) => {
                    warn!(order_id = %producer.order_id, error = %err, "failed to publish location")
                }
            }

            ticks_in_phase += 1;
            if ticks_in_phase < ticks_per_phase {
                continue;
            }
            ticks_in_phase = 0;

            let Some(next) = producer.phase.next() else {
                break;
            };
            if let Err(err) = producer.change_phase(next) {
                warn!(order_id = %producer.order_id, error = %err, "failed to publish status");
            }
            if next == DeliveryPhase::Delivered {
                break;
            }
        }

        info!(order_id = %producer.order_id, "delivery simulation finished");
    });

    SimulationHandle {
        order_id: order_id.to_string(),
        task,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::time::timeout;

    use super::*;
    use crate::channel::ChannelHub;

    #[test]
    fn perturb_stays_within_jitter() {
        let hub = Arc::new(ChannelHub::new(8));
        let start = GeoPoint::new(28.6129, 77.2285);
        let mut producer = CourierProducer::new("1", start, DeliveryPhase::Pickup, hub);

        for _ in 0..50 {
            producer.perturb(0.001);
        }

        assert!((producer.location().lat - start.lat).abs() <= 0.025 + 1e-12);
        assert!((producer.location().lng - start.lng).abs() <= 0.025 + 1e-12);
    }

    #[test]
    fn location_emit_carries_phase_and_eta() {
        let hub = Arc::new(ChannelHub::new(8));
        let mut sub = hub.subscribe(UPDATE_LOCATION);
        let producer = CourierProducer::new(
            "12345",
            GeoPoint::new(28.6, 77.2),
            DeliveryPhase::Delivering,
            hub.clone(),
        );

        assert_eq!(producer.publish_location().unwrap(), 1);

        let emitted = sub.receiver.try_recv().unwrap();
        assert_eq!(emitted["orderId"], "12345");
        assert_eq!(emitted["status"], "delivering");
        assert_eq!(emitted["estimatedTime"], 15);
    }

    #[tokio::test]
    async fn simulation_runs_pickup_to_delivered() {
        let hub = Arc::new(ChannelHub::new(64));
        let mut status = hub.subscribe(UPDATE_STATUS);
        let mut locations = hub.subscribe(UPDATE_LOCATION);

        let settings = SimulationSettings {
            interval: Duration::from_millis(20),
            jitter_deg: 0.001,
            ticks_per_phase: 2,
        };
        let handle = spawn_simulation(hub.clone(), "12345", GeoPoint::new(28.6129, 77.2285), settings);

        let mut phases = Vec::new();
        while phases.last().map(String::as_str) != Some("delivered") {
            let event: Value = timeout(Duration::from_secs(5), status.receiver.recv())
                .await
                .unwrap()
                .unwrap();
            phases.push(event["status"].as_str().unwrap().to_string());
        }

        assert_eq!(phases, vec!["pickup", "delivering", "delivered"]);

        let mut fixes = 0;
        while locations.receiver.try_recv().is_ok() {
            fixes += 1;
        }
        assert_eq!(fixes, 4);

        timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn stopped_simulation_publishes_nothing_more() {
        let hub = Arc::new(ChannelHub::new(64));
        let mut locations = hub.subscribe(UPDATE_LOCATION);

        let handle = spawn_simulation(
            hub.clone(),
            "12345",
            GeoPoint::new(28.6129, 77.2285),
            SimulationSettings {
                interval: Duration::from_millis(20),
                ..SimulationSettings::default()
            },
        );
        handle.stop();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(locations.receiver.try_recv().is_err());
    }
}
