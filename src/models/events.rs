use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;
use crate::geo::GeoPoint;
use crate::models::phase::DeliveryPhase;

pub const UPDATE_LOCATION: &str = "update-location";
pub const UPDATE_STATUS: &str = "update-status";

/// Minutes as carried on the wire, narrowed to what a session stores.
pub fn eta_minutes(minutes: i64) -> Result<u32, EventError> {
    if minutes < 0 {
        return Err(EventError::NegativeEta(minutes));
    }
    u32::try_from(minutes).map_err(|_| EventError::Malformed(format!("eta {minutes} out of range")))
}

pub fn location_channel(order_id: &str) -> String {
    format!("location-{order_id}")
}

pub fn status_channel(order_id: &str) -> String {
    format!("status-{order_id}")
}

/// Body of `location-{orderId}`. Status and eta ride along when the producer knows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<i64>,
}

impl LocationPayload {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Body of `status-{orderId}`. Both fields are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: String,
    pub estimated_time: i64,
}

/// Producer-side phase change; a missing eta is filled from the phase default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub estimated_time: Option<i64>,
}

impl StatusUpdate {
    pub fn resolve(self) -> Result<StatusPayload, EventError> {
        let phase: DeliveryPhase = self.status.parse()?;
        let estimated_time = match self.estimated_time {
            Some(minutes) => eta_minutes(minutes)?,
            None => phase.default_eta_minutes(),
        };

        Ok(StatusPayload {
            status: self.status,
            estimated_time: i64::from(estimated_time),
        })
    }
}

/// Outbound `update-location`: a location payload addressed to one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocation {
    pub order_id: String,
    #[serde(flatten)]
    pub payload: LocationPayload,
}

/// Outbound `update-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub order_id: String,
    #[serde(flatten)]
    pub payload: StatusPayload,
}

/// Text frames a producer may send over the order websocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ProducerMessage {
    #[serde(rename = "update-location")]
    UpdateLocation(LocationPayload),
    #[serde(rename = "update-status")]
    UpdateStatus(StatusUpdate),
}

pub fn to_value<T: Serialize>(message: &T) -> Result<Value, EventError> {
    serde_json::to_value(message).map_err(|err| EventError::Malformed(err.to_string()))
}

pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, EventError> {
    T::deserialize(value).map_err(|err| EventError::Malformed(err.to_string()))
}
