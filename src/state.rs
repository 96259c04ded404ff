use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::channel::{ChannelHub, EventChannel};
use crate::engine::session::OrderTrackingSession;
use crate::engine::simulator::{SimulationHandle, SimulationSettings, spawn_simulation};
use crate::error::{AppError, EventError};
use crate::models::events::{
    LocationPayload, StatusUpdate, UPDATE_LOCATION, UPDATE_STATUS, UpdateLocation, UpdateStatus,
    eta_minutes, to_value,
};
use crate::models::order::TrackedOrder;
use crate::models::phase::DeliveryPhase;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub channel: Arc<ChannelHub>,
    pub sessions: DashMap<String, Arc<OrderTrackingSession>>,
    pub simulations: DashMap<String, SimulationHandle>,
    pub simulation: SimulationSettings,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize, simulation: SimulationSettings) -> Self {
        Self {
            channel: Arc::new(ChannelHub::new(event_buffer_size)),
            sessions: DashMap::new(),
            simulations: DashMap::new(),
            simulation,
            metrics: Metrics::new(),
        }
    }

    pub fn event_channel(&self) -> Arc<dyn EventChannel> {
        self.channel.clone()
    }

    /// Starts tracking `order`, tearing down any earlier session for the same id first.
    pub fn track(&self, order: TrackedOrder) -> Arc<OrderTrackingSession> {
        match self.sessions.entry(order.order_id.clone()) {
            Entry::Occupied(mut entry) => {
                self.stop_simulation(&order.order_id);
                entry.get().teardown();
                let session =
                    OrderTrackingSession::open(order, self.event_channel(), self.metrics.clone());
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session =
                    OrderTrackingSession::open(order, self.event_channel(), self.metrics.clone());
                entry.insert(session.clone());
                self.metrics.active_sessions.inc();
                session
            }
        }
    }

    pub fn session(&self, order_id: &str) -> Option<Arc<OrderTrackingSession>> {
        self.sessions
            .get(order_id)
            .map(|entry| entry.value().clone())
    }

    /// Ends tracking and any simulation for the order. Returns whether a session existed.
    pub fn untrack(&self, order_id: &str) -> bool {
        self.stop_simulation(order_id);

        match self.sessions.remove(order_id) {
            Some((_, session)) => {
                session.teardown();
                self.metrics.active_sessions.dec();
                true
            }
            None => false,
        }
    }

    pub fn start_simulation(&self, order_id: &str) -> Result<(), AppError> {
        let session = self
            .session(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} is not tracked")))?;

        self.simulations.retain(|_, handle| !handle.is_finished());

        match self.simulations.entry(order_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!(
                    "simulation for order {order_id} already running"
                )));
            }
            Entry::Vacant(entry) => {
                let start = session.snapshot().current_location;
                entry.insert(spawn_simulation(
                    self.event_channel(),
                    order_id,
                    start,
                    self.simulation.clone(),
                ));
            }
        }

        self.metrics
            .active_simulations
            .set(self.simulations.len() as i64);
        Ok(())
    }

    pub fn stop_simulation(&self, order_id: &str) {
        if let Some((_, handle)) = self.simulations.remove(order_id) {
            handle.stop();
        }
        self.metrics
            .active_simulations
            .set(self.simulations.len() as i64);
    }

    pub fn running_simulations(&self) -> usize {
        self.simulations
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Producer `update-location` emit. Payloads a session would reject are refused here.
    pub fn publish_location(
        &self,
        order_id: &str,
        payload: LocationPayload,
    ) -> Result<usize, AppError> {
        let point = payload.point();
        if !point.is_valid() {
            return Err(EventError::InvalidCoordinate {
                lat: point.lat,
                lng: point.lng,
            }
            .into());
        }
        if let Some(status) = payload.status.as_deref() {
            status.parse::<DeliveryPhase>()?;
        }
        if let Some(minutes) = payload.estimated_time {
            eta_minutes(minutes)?;
        }

        let update = UpdateLocation {
            order_id: order_id.to_string(),
            payload,
        };
        Ok(self.channel.publish(UPDATE_LOCATION, to_value(&update)?))
    }

    /// Producer `update-status` emit.
    pub fn publish_status(&self, order_id: &str, update: StatusUpdate) -> Result<usize, AppError> {
        let payload = update.resolve()?;
        info!(order_id, phase = %payload.status, "phase change published");

        let update = UpdateStatus {
            order_id: order_id.to_string(),
            payload,
        };
        Ok(self.channel.publish(UPDATE_STATUS, to_value(&update)?))
    }
}
