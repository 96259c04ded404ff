use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, SubscriptionHandle};
use crate::engine::tracking::TrackingState;
use crate::engine::waypoints::select_waypoints;
use crate::error::EventError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::events::{
    LocationPayload, StatusPayload, from_value, location_channel, status_channel,
};
use crate::models::order::{OrderMetadata, TrackedOrder};
use crate::models::phase::{DeliveryPhase, StepProgress, step_progress};
use crate::observability::metrics::Metrics;

const LOCATION: &str = "location";
const STATUS: &str = "status";

struct SessionInner {
    state: TrackingState,
    subscriptions: Vec<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    updates: Option<watch::Sender<TrackingState>>,
    closed: bool,
}

/// Live view of one order, fed by its `location-{id}` and `status-{id}` channels.
///
/// Events are applied one at a time under the session lock. After
/// [`teardown`](Self::teardown) returns no event is applied anymore.
pub struct OrderTrackingSession {
    order: TrackedOrder,
    channel: Arc<dyn EventChannel>,
    metrics: Metrics,
    inner: Mutex<SessionInner>,
}

impl OrderTrackingSession {
    pub fn open(order: TrackedOrder, channel: Arc<dyn EventChannel>, metrics: Metrics) -> Arc<Self> {
        let location = channel.subscribe(&location_channel(&order.order_id));
        let status = channel.subscribe(&status_channel(&order.order_id));

        let state = TrackingState::new(order.agent);
        let (updates, _initial_rx) = watch::channel(state.clone());

        let session = Arc::new(Self {
            order,
            channel,
            metrics,
            inner: Mutex::new(SessionInner {
                state,
                subscriptions: vec![location.handle, status.handle],
                pump: None,
                updates: Some(updates),
                closed: false,
            }),
        });

        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&session),
            location.receiver,
            status.receiver,
        ));
        session.lock().pump = Some(pump);

        info!(order_id = %session.order.order_id, "tracking session opened");
        session
    }

    pub fn order(&self) -> &TrackedOrder {
        &self.order
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Cancels both subscriptions and the pump. Safe to call any number of times.
    pub fn teardown(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;

        for handle in inner.subscriptions.drain(..) {
            self.channel.unsubscribe(&handle);
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.updates = None;

        info!(order_id = %self.order.order_id, "tracking session torn down");
    }

    pub fn apply_location_value(&self, payload: &Value) -> Result<(), EventError> {
        let decoded = from_value::<LocationPayload>(payload);
        match decoded {
            Ok(event) => self.apply_location(&event),
            Err(err) => Err(self.reject(LOCATION, err)),
        }
    }

    pub fn apply_status_value(&self, payload: &Value) -> Result<(), EventError> {
        let decoded = from_value::<StatusPayload>(payload);
        match decoded {
            Ok(event) => self.apply_status(&event),
            Err(err) => Err(self.reject(STATUS, err)),
        }
    }

    pub fn apply_location(&self, event: &LocationPayload) -> Result<(), EventError> {
        let mut inner = self.lock();
        if inner.closed {
            debug!(order_id = %self.order.order_id, "location event after teardown dropped");
            return Ok(());
        }

        let result = inner.state.on_location(event);
        let transition = match result {
            Ok(transition) => transition,
            Err(err) => {
                drop(inner);
                return Err(self.reject(LOCATION, err));
            }
        };

        if let Some(ignored) = &transition.ignored {
            warn!(
                order_id = %self.order.order_id,
                reason = ignored.reason(),
                error = %ignored,
                "status part of location event ignored"
            );
        }
        self.log_regression(&inner.state, transition.state.phase);

        debug!(
            order_id = %self.order.order_id,
            lat = transition.state.current_location.lat,
            lng = transition.state.current_location.lng,
            phase = %transition.state.phase,
            "location applied"
        );
        self.commit(&mut inner, transition.state);
        self.metrics.record_event(LOCATION, "applied");
        Ok(())
    }

    pub fn apply_status(&self, event: &StatusPayload) -> Result<(), EventError> {
        let mut inner = self.lock();
        if inner.closed {
            debug!(order_id = %self.order.order_id, "status event after teardown dropped");
            return Ok(());
        }

        let result = inner.state.on_status(event);
        let next = match result {
            Ok(next) => next,
            Err(err) => {
                drop(inner);
                return Err(self.reject(STATUS, err));
            }
        };

        self.log_regression(&inner.state, next.phase);
        debug!(
            order_id = %self.order.order_id,
            phase = %next.phase,
            eta_minutes = next.eta_minutes,
            "status applied"
        );
        self.commit(&mut inner, next);
        self.metrics.record_event(STATUS, "applied");
        Ok(())
    }

    pub fn snapshot(&self) -> TrackingState {
        self.lock().state.clone()
    }

    /// Receives every accepted snapshot; `None` once the session is torn down.
    pub fn updates(&self) -> Option<watch::Receiver<TrackingState>> {
        self.lock().updates.as_ref().map(watch::Sender::subscribe)
    }

    pub fn bearing(&self) -> Option<f64> {
        self.snapshot().bearing()
    }

    pub fn waypoints(&self) -> Vec<GeoPoint> {
        route_for(&self.order, &self.snapshot())
    }

    pub fn progress_index(&self) -> i32 {
        self.snapshot().phase.progress_index()
    }

    pub fn steps(&self) -> Vec<StepProgress> {
        step_progress(self.snapshot().phase)
    }

    pub fn estimated_arrival_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        arrival_at(&self.snapshot(), now)
    }

    pub fn remaining_km(&self) -> Option<f64> {
        route_length_km(&self.waypoints())
    }

    pub fn view(&self) -> TrackingView {
        TrackingView::build(&self.order, &self.snapshot(), Utc::now())
    }

    fn commit(&self, inner: &mut SessionInner, next: TrackingState) {
        if let Some(updates) = &inner.updates {
            updates.send_replace(next.clone());
        }
        inner.state = next;
    }

    fn reject(&self, channel: &'static str, err: EventError) -> EventError {
        warn!(
            order_id = %self.order.order_id,
            channel,
            reason = err.reason(),
            error = %err,
            "event rejected"
        );
        self.metrics.record_event(channel, "rejected");
        err
    }

    fn log_regression(&self, current: &TrackingState, next: DeliveryPhase) {
        if current.regresses_to(next) {
            debug!(
                order_id = %self.order.order_id,
                from = %current.phase,
                to = %next,
                "phase regressed"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OrderTrackingSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump_events(
    session: Weak<OrderTrackingSession>,
    mut location: broadcast::Receiver<Value>,
    mut status: broadcast::Receiver<Value>,
) {
    loop {
        let (channel, received) = tokio::select! {
            biased;
            received = location.recv() => (LOCATION, received),
            received = status.recv() => (STATUS, received),
        };

        let payload = match received {
            Ok(payload) => payload,
            Err(RecvError::Lagged(skipped)) => {
                warn!(channel, skipped, "tracking session lagged behind channel");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(live) = session.upgrade() else {
            break;
        };

        // Rejections are logged and counted inside the session.
        let _ = if channel == LOCATION {
            live.apply_location_value(&payload)
        } else {
            live.apply_status_value(&payload)
        };
    }
}

fn route_for(order: &TrackedOrder, state: &TrackingState) -> Vec<GeoPoint> {
    select_waypoints(
        Some(state.phase),
        state.current_location,
        order.store,
        order.customer,
    )
}

fn route_length_km(route: &[GeoPoint]) -> Option<f64> {
    match (route.first(), route.last()) {
        (Some(from), Some(to)) => Some(haversine_km(from, to)),
        _ => None,
    }
}

fn arrival_at(state: &TrackingState, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(i64::from(state.eta_minutes))
}

/// Everything a renderer needs for one order, computed on read.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingView {
    pub order_id: String,
    pub phase: DeliveryPhase,
    pub phase_label: &'static str,
    pub progress_index: i32,
    pub steps: Vec<StepProgress>,
    pub eta_minutes: u32,
    pub estimated_arrival: DateTime<Utc>,
    pub current_location: GeoPoint,
    pub previous_location: Option<GeoPoint>,
    pub bearing: Option<f64>,
    pub waypoints: Vec<GeoPoint>,
    pub remaining_km: Option<f64>,
    pub store: GeoPoint,
    pub customer: GeoPoint,
    pub metadata: OrderMetadata,
}

impl TrackingView {
    pub fn build(order: &TrackedOrder, state: &TrackingState, now: DateTime<Utc>) -> Self {
        let waypoints = route_for(order, state);

        Self {
            order_id: order.order_id.clone(),
            phase: state.phase,
            phase_label: state.phase.label(),
            progress_index: state.phase.progress_index(),
            steps: step_progress(state.phase),
            eta_minutes: state.eta_minutes,
            estimated_arrival: arrival_at(state, now),
            current_location: state.current_location,
            previous_location: state.previous_location,
            bearing: state.bearing(),
            remaining_km: route_length_km(&waypoints),
            waypoints,
            store: order.store,
            customer: order.customer,
            metadata: order.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::{Duration as TokioDuration, timeout};

    use super::*;
    use crate::channel::ChannelHub;
    use crate::models::order::DeliveryPartner;

    const STORE: GeoPoint = GeoPoint {
        lat: 28.6129,
        lng: 77.2285,
    };
    const CUSTOMER: GeoPoint = GeoPoint {
        lat: 28.6304,
        lng: 77.2177,
    };
    const AGENT: GeoPoint = GeoPoint {
        lat: 28.6139,
        lng: 77.2090,
    };

    fn order(id: &str) -> TrackedOrder {
        TrackedOrder::new(
            id,
            STORE,
            CUSTOMER,
            OrderMetadata {
                items: vec!["2x Burger".to_string(), "1x Pizza".to_string()],
                total: 45_000,
                currency: "INR".to_string(),
                placed_at: Utc::now(),
                partner: DeliveryPartner {
                    name: "Rajesh Kumar".to_string(),
                    phone: "+91 98765 43210".to_string(),
                    rating: 4.8,
                    vehicle_number: "DL-12-AB-3456".to_string(),
                },
            },
        )
        .with_agent(AGENT)
    }

    fn open(hub: &Arc<ChannelHub>, id: &str) -> Arc<OrderTrackingSession> {
        OrderTrackingSession::open(order(id), hub.clone(), Metrics::new())
    }

    async fn next_change(rx: &mut watch::Receiver<TrackingState>) -> TrackingState {
        timeout(TokioDuration::from_secs(1), rx.changed())
            .await
            .expect("update in time")
            .expect("session alive");
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn pickup_status_then_location_scenario() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");

        assert_eq!(session.snapshot().phase, DeliveryPhase::Confirmed);
        assert_eq!(session.waypoints(), vec![STORE, CUSTOMER]);
        assert_eq!(session.bearing(), None);

        session
            .apply_status_value(&json!({ "status": "pickup", "estimatedTime": 25 }))
            .unwrap();
        let state = session.snapshot();
        assert_eq!(state.phase, DeliveryPhase::Pickup);
        assert_eq!(state.eta_minutes, 25);
        assert_eq!(session.waypoints(), vec![AGENT, STORE]);

        session
            .apply_location_value(&json!({ "latitude": 28.6130, "longitude": 77.2200 }))
            .unwrap();
        let state = session.snapshot();
        assert_eq!(state.current_location, GeoPoint::new(28.6130, 77.2200));
        assert_eq!(state.previous_location, Some(AGENT));
        assert_eq!(state.phase, DeliveryPhase::Pickup);

        let bearing = session.bearing().unwrap();
        assert!((0.0..360.0).contains(&bearing));
    }

    #[tokio::test]
    async fn unknown_status_is_rejected() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        session
            .apply_status_value(&json!({ "status": "pickup", "estimatedTime": 25 }))
            .unwrap();

        let result = session.apply_status_value(&json!({ "status": "unknown", "estimatedTime": 3 }));

        assert_eq!(result, Err(EventError::UnknownPhase("unknown".to_string())));
        let state = session.snapshot();
        assert_eq!(state.phase, DeliveryPhase::Pickup);
        assert_eq!(state.eta_minutes, 25);
    }

    #[tokio::test]
    async fn malformed_location_keeps_prior_state() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        let before = session.snapshot();

        assert!(session.apply_location_value(&json!({ "latitude": 28.6 })).is_err());
        assert!(
            session
                .apply_location_value(&json!({ "latitude": "x", "longitude": 77.2 }))
                .is_err()
        );
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn delivered_has_no_route_and_full_progress() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");

        session
            .apply_status(&StatusPayload {
                status: "delivered".to_string(),
                estimated_time: 0,
            })
            .unwrap();

        assert!(session.waypoints().is_empty());
        assert_eq!(session.remaining_km(), None);
        assert_eq!(session.progress_index(), 4);
        assert!(session.steps().iter().all(|step| step.active));
    }

    #[tokio::test]
    async fn estimated_arrival_adds_eta_to_now() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        session
            .apply_status_value(&json!({ "status": "delivering", "estimatedTime": 15 }))
            .unwrap();

        let now = Utc::now();
        assert_eq!(session.estimated_arrival_at(now), now + Duration::minutes(15));
    }

    #[tokio::test]
    async fn events_arrive_through_channels() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        let mut rx = session.updates().unwrap();

        hub.publish("status-12345", json!({ "status": "delivering", "estimatedTime": 12 }));
        let state = next_change(&mut rx).await;
        assert_eq!(state.phase, DeliveryPhase::Delivering);
        assert_eq!(state.eta_minutes, 12);

        hub.publish("location-12345", json!({ "latitude": 28.62, "longitude": 77.22 }));
        let state = next_change(&mut rx).await;
        assert_eq!(state.current_location, GeoPoint::new(28.62, 77.22));
        assert_eq!(session.waypoints(), vec![GeoPoint::new(28.62, 77.22), CUSTOMER]);
    }

    #[tokio::test]
    async fn other_orders_do_not_leak_in() {
        let hub = Arc::new(ChannelHub::new(16));
        let first = open(&hub, "1");
        let second = open(&hub, "2");
        let mut rx = second.updates().unwrap();

        hub.publish("status-2", json!({ "status": "pickup", "estimatedTime": 20 }));
        next_change(&mut rx).await;

        assert_eq!(first.snapshot().phase, DeliveryPhase::Confirmed);
        assert_eq!(second.snapshot().phase, DeliveryPhase::Pickup);
    }

    #[tokio::test]
    async fn buffered_location_is_applied_before_buffered_status() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        let mut rx = session.updates().unwrap();

        hub.publish("status-12345", json!({ "status": "delivered", "estimatedTime": 0 }));
        hub.publish(
            "location-12345",
            json!({ "latitude": 28.63, "longitude": 77.218, "status": "delivering" }),
        );

        next_change(&mut rx).await;
        tokio::time::sleep(TokioDuration::from_millis(50)).await;

        let state = session.snapshot();
        assert_eq!(state.current_location, GeoPoint::new(28.63, 77.218));
        assert_eq!(state.phase, DeliveryPhase::Delivered);
        assert_eq!(state.eta_minutes, 0);
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_final() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        assert_eq!(hub.listener_count("location-12345"), 1);
        assert_eq!(hub.listener_count("status-12345"), 1);

        session.teardown();
        session.teardown();

        assert!(session.is_closed());
        assert!(session.updates().is_none());
        assert_eq!(hub.listener_count("location-12345"), 0);
        assert_eq!(hub.listener_count("status-12345"), 0);

        let before = session.snapshot();
        assert_eq!(hub.publish("status-12345", json!({ "status": "pickup", "estimatedTime": 25 })), 0);
        session
            .apply_status_value(&json!({ "status": "pickup", "estimatedTime": 25 }))
            .unwrap();
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn dropping_the_session_releases_subscriptions() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "77");
        drop(session);

        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn view_bundles_derived_values() {
        let hub = Arc::new(ChannelHub::new(16));
        let session = open(&hub, "12345");
        session
            .apply_status_value(&json!({ "status": "pickup", "estimatedTime": 25 }))
            .unwrap();

        let view = session.view();
        assert_eq!(view.order_id, "12345");
        assert_eq!(view.phase_label, "Out for Pickup");
        assert_eq!(view.progress_index, 2);
        assert_eq!(view.waypoints, vec![AGENT, STORE]);
        let remaining = view.remaining_km.unwrap();
        assert!((remaining - haversine_km(&AGENT, &STORE)).abs() < 1e-9);
        assert_eq!(view.metadata.partner.name, "Rajesh Kumar");
    }
}
