use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::config::BusConfig;
use crate::models::MeterStatus;
use crate::mqtt::{publish_protocol_count, Transmission};
use link::{MeterLink, SerialLink};
use poller::MeterPoller;

pub mod crc;
pub mod frame;
pub mod channels;
pub mod link;
pub mod sampler;
pub mod poller;

#[cfg(test)]
pub(crate) mod test_support;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MercuryError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Communication(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("cannot decode reading: {0}")]
    Decode(String),
}

/// One shared link and the meters polled over it.
struct MercuryBus {
    name: String,
    link: Arc<dyn MeterLink>,
    meters: Vec<MeterPoller>,
}

pub struct MercuryManager {
    sender: Sender<Transmission>,
    buses: Vec<MercuryBus>,
}

impl MercuryManager {
    pub fn new(sender: Sender<Transmission>, buses: &[BusConfig]) -> Self {
        let mut manager = MercuryManager { sender, buses: Vec::new() };
        for bus in buses.iter() {
            let link: Arc<dyn MeterLink> = Arc::new(SerialLink::from_bus(bus));
            manager.add_bus(bus, link);
        }
        manager
    }

    /// Registers the meters of `bus` on an already created link.
    pub fn add_bus(&mut self, bus: &BusConfig, link: Arc<dyn MeterLink>) {
        if bus.meters.is_empty() {
            warn!("Bus {} has no meters configured", bus.name);
        }

        let meters = bus
            .meters
            .iter()
            .map(|m| MeterPoller::new(m.clone(), bus.timing.clone(), link.clone(), self.sender.clone()))
            .collect();
        self.buses.push(MercuryBus { name: bus.name.clone(), link, meters });
    }

    pub fn meter_count(&self) -> usize {
        self.buses.iter().map(|b| b.meters.len()).sum()
    }

    pub async fn start(&mut self) {
        info!("Starting Mercury with {} buses and {} meters", self.buses.len(), self.meter_count());
        publish_protocol_count(&self.sender, "mercury", self.meter_count() as u32).await;

        for bus in self.buses.iter_mut() {
            info!("Starting meters on {} ({})", bus.name, bus.link.name());
            for meter in bus.meters.iter_mut() {
                meter.start();
            }
        }
    }

    /// Stops every poller first so nothing talks to a link while it closes.
    pub async fn stop(&mut self) {
        for bus in self.buses.iter_mut() {
            for meter in bus.meters.iter_mut() {
                meter.stop();
            }
        }
        for bus in self.buses.iter() {
            bus.link.disconnect().await;
            info!("Closed bus {}", bus.name);
        }
    }

    pub fn statuses(&self) -> Vec<MeterStatus> {
        self.buses
            .iter()
            .flat_map(|b| b.meters.iter().map(|m| m.status()))
            .collect()
    }
}
