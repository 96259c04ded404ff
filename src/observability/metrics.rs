use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub tracking_events_total: IntCounterVec,
    pub relayed_events_total: IntCounterVec,
    pub active_sessions: IntGauge,
    pub active_simulations: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tracking_events_total = IntCounterVec::new(
            Opts::new(
                "tracking_events_total",
                "Events seen by tracking sessions by channel kind and outcome",
            ),
            &["channel", "outcome"],
        )
        .expect("valid tracking_events_total metric");

        let relayed_events_total = IntCounterVec::new(
            Opts::new(
                "relayed_events_total",
                "Producer emits relayed to order channels by channel kind and outcome",
            ),
            &["channel", "outcome"],
        )
        .expect("valid relayed_events_total metric");

        let active_sessions = IntGauge::new("active_sessions", "Orders currently tracked")
            .expect("valid active_sessions metric");

        let active_simulations =
            IntGauge::new("active_simulations", "Producer simulations currently running")
                .expect("valid active_simulations metric");

        registry
            .register(Box::new(tracking_events_total.clone()))
            .expect("register tracking_events_total");
        registry
            .register(Box::new(relayed_events_total.clone()))
            .expect("register relayed_events_total");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register active_sessions");
        registry
            .register(Box::new(active_simulations.clone()))
            .expect("register active_simulations");

        Self {
            registry,
            tracking_events_total,
            relayed_events_total,
            active_sessions,
            active_simulations,
        }
    }

    pub fn record_event(&self, channel: &str, outcome: &str) {
        self.tracking_events_total
            .with_label_values(&[channel, outcome])
            .inc();
    }

    pub fn record_relay(&self, channel: &str, outcome: &str) {
        self.relayed_events_total
            .with_label_values(&[channel, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
