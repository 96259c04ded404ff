use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPartner {
    pub name: String,
    pub phone: String,
    pub rating: f64,
    pub vehicle_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMetadata {
    pub items: Vec<String>,
    /// Minor currency units.
    pub total: i64,
    pub currency: String,
    pub placed_at: DateTime<Utc>,
    pub partner: DeliveryPartner,
}

/// Static facts about an order under tracking. Events never touch these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub order_id: String,
    pub store: GeoPoint,
    pub customer: GeoPoint,
    /// Agent position before the first fix arrives.
    pub agent: GeoPoint,
    pub metadata: OrderMetadata,
}

impl TrackedOrder {
    pub fn new(
        order_id: impl Into<String>,
        store: GeoPoint,
        customer: GeoPoint,
        metadata: OrderMetadata,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            store,
            customer,
            agent: store,
            metadata,
        }
    }

    pub fn with_agent(mut self, agent: GeoPoint) -> Self {
        self.agent = agent;
        self
    }
}
