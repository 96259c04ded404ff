use crate::geo::GeoPoint;
use crate::models::phase::DeliveryPhase;

/// Route endpoints worth drawing for the current phase.
///
/// `None` stands for a phase value that is not part of the vocabulary and gets
/// the same store-to-customer preview as the early phases.
pub fn select_waypoints(
    phase: Option<DeliveryPhase>,
    current: GeoPoint,
    store: GeoPoint,
    customer: GeoPoint,
) -> Vec<GeoPoint> {
    match phase {
        Some(DeliveryPhase::Pickup) => vec![current, store],
        Some(DeliveryPhase::Delivering) => vec![current, customer],
        Some(DeliveryPhase::Delivered) => Vec::new(),
        Some(DeliveryPhase::Confirmed) | Some(DeliveryPhase::Preparing) | None => {
            vec![store, customer]
        }
    }
}

/// Same as [`select_waypoints`] for a raw phase key.
pub fn select_waypoints_for_key(
    phase: &str,
    current: GeoPoint,
    store: GeoPoint,
    customer: GeoPoint,
) -> Vec<GeoPoint> {
    select_waypoints(phase.parse().ok(), current, store, customer)
}
