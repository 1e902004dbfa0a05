use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::collections::HashSet;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::metering_mercury::channels::MeterChannel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read the config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse the config: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn mqtt_client_name_default() -> String { return "mercury2mqtt".to_string() }
fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_base_topic_default() -> String { return "mercury2mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub enum BusTransport {
    Serial,
    Tcp,
}

fn timing_settle_delay_default() -> u64 { 100 }
fn timing_read_timeout_default() -> u64 { 100 }
fn timing_max_read_attempts_default() -> u32 { 10 }
fn timing_sample_pause_default() -> u64 { 500 }
fn timing_power_sample_pause_default() -> u64 { 0 }
fn timing_address_attempts_default() -> u32 { 5 }
fn timing_address_retry_default() -> u64 { 1000 }

/// Every delay the bus conversation depends on, in milliseconds.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TimingConfig {
    /// Pause between writing a request and reading the answer
    #[serde(default="timing_settle_delay_default")]
    pub settle_delay_ms: u64,
    /// How long a single read may wait for more bytes
    #[serde(default="timing_read_timeout_default")]
    pub read_timeout_ms: u64,
    #[serde(default="timing_max_read_attempts_default")]
    pub max_read_attempts: u32,
    /// Pause before every sample of voltage, current, energy and frequency
    #[serde(default="timing_sample_pause_default")]
    pub sample_pause_ms: u64,
    /// Pause before every sample of the power channels
    #[serde(default="timing_power_sample_pause_default")]
    pub power_sample_pause_ms: u64,
    #[serde(default="timing_address_attempts_default")]
    pub address_attempts: u32,
    #[serde(default="timing_address_retry_default")]
    pub address_retry_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            settle_delay_ms: timing_settle_delay_default(),
            read_timeout_ms: timing_read_timeout_default(),
            max_read_attempts: timing_max_read_attempts_default(),
            sample_pause_ms: timing_sample_pause_default(),
            power_sample_pause_ms: timing_power_sample_pause_default(),
            address_attempts: timing_address_attempts_default(),
            address_retry_ms: timing_address_retry_default(),
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration { Duration::from_millis(self.settle_delay_ms) }
    pub fn read_timeout(&self) -> Duration { Duration::from_millis(self.read_timeout_ms) }
    pub fn sample_pause(&self) -> Duration { Duration::from_millis(self.sample_pause_ms) }
    pub fn power_sample_pause(&self) -> Duration { Duration::from_millis(self.power_sample_pause_ms) }
    pub fn address_retry(&self) -> Duration { Duration::from_millis(self.address_retry_ms) }
}

fn meter_password_default() -> String { return "111111".to_string() }
fn meter_poll_interval_default() -> i64 { return 10 }
fn meter_channels_default() -> Vec<MeterChannel> { return MeterChannel::all() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeterConfig {
    pub name: String,
    /* kept as string, a leading zero is a valid digit */
    #[serde(default="meter_password_default")]
    pub password: String,
    /* seconds, anything <= 0 disables polling */
    #[serde(default="meter_poll_interval_default")]
    pub poll_interval: i64,
    /* fixed bus address, skips the address query */
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default="meter_channels_default")]
    pub channels: Vec<MeterChannel>,
}

impl MeterConfig {
    pub fn poll_period(&self) -> Option<Duration> {
        if self.poll_interval <= 0 {
            return None;
        }
        return Some(Duration::from_secs(self.poll_interval as u64));
    }
}

fn bus_transport_default() -> BusTransport { BusTransport::Serial }
fn bus_baud_rate_default() -> u32 { 9600 }
fn bus_meters_default() -> Vec<MeterConfig> { Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct BusConfig {
    pub name: String,
    #[serde(default="bus_transport_default")]
    pub transport: BusTransport,
    /* serial device, or host:port for the Tcp transport */
    #[serde(default)]
    pub port: String,
    #[serde(default="bus_baud_rate_default")]
    pub baud_rate: u32,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default="bus_meters_default")]
    pub meters: Vec<MeterConfig>,
}

fn buses_default() -> Vec<BusConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default="buses_default")]
    pub buses: Vec<BusConfig>,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        c.validate()?;
        return Ok(c);
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        debug!("Read {} bytes of config from {:?}", contents.len(), path.as_ref());
        return Config::from_yaml(&contents);
    }

    /// Uses the explicit path if given, otherwise config/m2m.yaml and then m2m.yaml.
    pub fn load(explicit: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading config from {path}");
            return Config::load_from(path);
        }

        for path in ["config/m2m.yaml", "m2m.yaml"] {
            if Path::new(path).exists() {
                info!("Loading config from {path}");
                return Config::load_from(path);
            }
        }

        Err(ConfigError::Invalid("Unable to find the config on config/m2m.yaml or m2m.yaml".to_string()))
    }

    /* An empty port or a bad password are reported by the meter link at runtime */
    pub fn validate(&self) -> Result<(), ConfigError> {
        for bus in self.buses.iter() {
            let mut names = HashSet::new();
            for meter in bus.meters.iter() {
                if meter.name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("Meter without a name on bus {}", bus.name)));
                }
                if !names.insert(meter.name.clone()) {
                    return Err(ConfigError::Invalid(format!("Meter {} is configured twice on bus {}", meter.name, bus.name)));
                }
            }
        }
        return Ok(());
    }

    pub fn meter_count(&self) -> usize {
        self.buses.iter().map(|b| b.meters.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
mqtt:
  host: broker.local
  user: meter
  pass: secret
buses:
  - name: rs485
    port: /dev/ttyUSB0
    baud_rate: 19200
    timing:
      sample_pause_ms: 250
    meters:
      - name: flat
        password: "012345"
        poll_interval: 30
        channels: [voltage1, current1, energy_active_total]
      - name: garage
        address: 42
        poll_interval: 0
"#;

    #[test]
    fn test_parse_full_config() {
        let c = Config::from_yaml(FULL).unwrap();
        assert_eq!(c.mqtt.port, 1883);
        assert_eq!(c.mqtt.client_name, "mercury2mqtt");
        assert_eq!(c.buses.len(), 1);

        let bus = &c.buses[0];
        assert_eq!(bus.transport, BusTransport::Serial);
        assert_eq!(bus.baud_rate, 19200);
        assert_eq!(bus.timing.sample_pause_ms, 250);
        assert_eq!(bus.timing.settle_delay_ms, 100);
        assert_eq!(bus.timing.power_sample_pause_ms, 0);
        assert_eq!(bus.timing.address_attempts, 5);

        let flat = &bus.meters[0];
        assert_eq!(flat.password, "012345");
        assert_eq!(flat.poll_period(), Some(Duration::from_secs(30)));
        assert_eq!(flat.channels, vec![MeterChannel::Voltage1, MeterChannel::Current1, MeterChannel::EnergyActiveTotal]);
        assert_eq!(flat.address, None);

        let garage = &bus.meters[1];
        assert_eq!(garage.password, "111111");
        assert_eq!(garage.address, Some(42));
        assert_eq!(garage.poll_period(), None);
        assert_eq!(garage.channels, MeterChannel::all());

        assert_eq!(c.meter_count(), 2);
    }

    #[test]
    fn test_negative_poll_interval_disables_polling() {
        let meter = MeterConfig {
            name: "m".to_string(),
            password: meter_password_default(),
            poll_interval: -5,
            address: None,
            channels: Vec::new(),
        };
        assert_eq!(meter.poll_period(), None);
    }

    #[test]
    fn test_duplicate_meter_names_rejected() {
        let yaml = r#"
mqtt:
  host: localhost
buses:
  - name: rs485
    port: /dev/ttyUSB0
    meters:
      - name: a
      - name: a
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_port_is_accepted_at_load_time() {
        let yaml = r#"
mqtt:
  host: localhost
buses:
  - name: rs485
    meters:
      - name: a
"#;
        let c = Config::from_yaml(yaml).unwrap();
        assert_eq!(c.buses[0].port, "");
    }

    #[test]
    fn test_broken_yaml() {
        assert!(matches!(Config::from_yaml("mqtt: [1, 2"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let c = Config::load_from(file.path()).unwrap();
        assert_eq!(c.mqtt.host, "broker.local");

        let missing = Config::load_from("/nonexistent/m2m.yaml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
