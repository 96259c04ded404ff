pub mod relay;
pub mod session;
pub mod simulator;
pub mod tracking;
pub mod waypoints;
