//! Mercury energy meter bridge
//!
//! Polls Mercury electricity meters over RS-485 (or a serial to TCP gateway)
//! and publishes their readings to MQTT.

pub mod models;
pub mod mqtt;
pub mod config;
pub mod metering_mercury;

// Re-export common types for easier access
pub use models::{DeviceStatus, MeterStatus};
pub use mqtt::{MeteringData, Transmission};
pub use config::Config;
pub use metering_mercury::{MercuryError, MercuryManager};

pub fn get_unix_ts() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}
