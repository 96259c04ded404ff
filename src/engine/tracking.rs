use serde::Serialize;

use crate::error::EventError;
use crate::geo::{GeoPoint, bearing_deg};
use crate::models::events::{LocationPayload, StatusPayload, eta_minutes};
use crate::models::phase::DeliveryPhase;

/// Mutable facts of one tracked order. Transitions return a new snapshot and
/// leave `self` untouched; events carry no sequence numbers, so the last one
/// applied wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingState {
    pub current_location: GeoPoint,
    pub previous_location: Option<GeoPoint>,
    pub phase: DeliveryPhase,
    pub eta_minutes: u32,
}

/// Accepted location event. `ignored` holds the reason the status/eta part was
/// skipped while the position itself still applied.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTransition {
    pub state: TrackingState,
    pub ignored: Option<EventError>,
}

impl TrackingState {
    pub fn new(agent: GeoPoint) -> Self {
        Self {
            current_location: agent,
            previous_location: None,
            phase: DeliveryPhase::Confirmed,
            eta_minutes: DeliveryPhase::Confirmed.default_eta_minutes(),
        }
    }

    pub fn on_location(&self, payload: &LocationPayload) -> Result<LocationTransition, EventError> {
        let point = payload.point();
        if !point.is_valid() {
            return Err(EventError::InvalidCoordinate {
                lat: point.lat,
                lng: point.lng,
            });
        }

        let mut next = self.clone();

        // A repeat of the current fix must not shift history.
        if point != self.current_location {
            next.previous_location = Some(self.current_location);
            next.current_location = point;
        }

        let ignored = match location_phase_update(payload) {
            Ok(Some((phase, eta))) => {
                next.phase = phase;
                next.eta_minutes = eta;
                None
            }
            Ok(None) => match payload.estimated_time.map(eta_minutes) {
                Some(Ok(eta)) => {
                    next.eta_minutes = eta;
                    None
                }
                Some(Err(err)) => Some(err),
                None => None,
            },
            Err(err) => Some(err),
        };

        Ok(LocationTransition {
            state: next,
            ignored,
        })
    }

    pub fn on_status(&self, payload: &StatusPayload) -> Result<TrackingState, EventError> {
        let phase: DeliveryPhase = payload.status.parse()?;
        let eta_minutes = eta_minutes(payload.estimated_time)?;

        Ok(TrackingState {
            phase,
            eta_minutes,
            ..self.clone()
        })
    }

    /// Heading from the previous fix to the current one; `None` until two fixes exist.
    pub fn bearing(&self) -> Option<f64> {
        self.previous_location
            .map(|previous| bearing_deg(&previous, &self.current_location))
    }

    pub fn regresses_to(&self, phase: DeliveryPhase) -> bool {
        phase.progress_index() < self.phase.progress_index()
    }
}

fn location_phase_update(
    payload: &LocationPayload,
) -> Result<Option<(DeliveryPhase, u32)>, EventError> {
    let Some(raw) = payload.status.as_deref() else {
        return Ok(None);
    };

    let phase: DeliveryPhase = raw.parse()?;
    let eta = match payload.estimated_time {
        Some(minutes) => eta_minutes(minutes)?,
        None => phase.default_eta_minutes(),
    };

    Ok(Some((phase, eta)))
}
