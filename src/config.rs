use std::env;
use std::time::Duration;

use crate::engine::simulator::SimulationSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub simulation: SimulationSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let interval_ms: u64 = parse_or_default("SIMULATION_INTERVAL_MS", 5_000)?;
        if interval_ms == 0 {
            return Err(AppError::Internal(
                "invalid SIMULATION_INTERVAL_MS: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            simulation: SimulationSettings {
                interval: Duration::from_millis(interval_ms),
                jitter_deg: parse_or_default("SIMULATION_JITTER_DEG", 0.001)?,
                ticks_per_phase: parse_or_default("SIMULATION_TICKS_PER_PHASE", 6)?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
