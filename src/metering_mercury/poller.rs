use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use crate::config::{MeterConfig, TimingConfig};
use crate::models::{DeviceProtocol, DeviceStatus, MeterStatus, StatusDetail};
use crate::mqtt::{MeteringData, Transmission};
use super::frame::{Command, Response, ADDRESS_RESPONSE_LEN};
use super::link::{ConnectionState, MeterLink};
use super::sampler::{Reading, ValueSampler};
use super::MercuryError;

/// Drives one meter: address acquisition once, then the periodic poll.
pub struct MeterPoller {
    shared: Arc<PollerShared>,
    worker: Option<JoinHandle<()>>,
    polling: Arc<Mutex<Option<JoinHandle<()>>>>,
}

struct PollerShared {
    config: MeterConfig,
    timing: TimingConfig,
    link: Arc<dyn MeterLink>,
    sender: Sender<Transmission>,
    status: RwLock<MeterStatus>,
    address: AtomicU8,
    stopped: AtomicBool,
}

/// Puts one reading and its unit into the published values.
pub fn insert_reading(data: &mut MeteringData, reading: &Reading) -> Result<(), MercuryError> {
    let value = serde_json::Number::from_f64(reading.value)
        .ok_or_else(|| MercuryError::Decode(format!("{} is not a publishable number", reading.value)))?;
    let id = reading.channel.id();
    data.metered_values.insert(id.to_string(), value.into());
    data.metered_values.insert(format!("{}_unit", id), reading.unit.into());
    Ok(())
}

impl MeterPoller {
    pub fn new(config: MeterConfig, timing: TimingConfig, link: Arc<dyn MeterLink>, sender: Sender<Transmission>) -> Self {
        let status = MeterStatus::new(&config.name);
        MeterPoller {
            shared: Arc::new(PollerShared {
                config,
                timing,
                link,
                sender,
                status: RwLock::new(status),
                address: AtomicU8::new(0),
                stopped: AtomicBool::new(false),
            }),
            worker: None,
            polling: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Runs the startup in the background, the poll task follows on success.
    pub fn start(&mut self) {
        if self.worker.as_ref().map_or(false, |w| !w.is_finished()) || self.is_polling() {
            warn!("Meter {} is already running", self.name());
            return;
        }

        self.shared.stopped.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let polling = self.polling.clone();
        self.worker = Some(tokio::spawn(async move {
            if !shared.startup().await {
                return;
            }

            let period = match shared.config.poll_period() {
                Some(p) => p,
                None => {
                    info!("Polling of {} is disabled", shared.config.name);
                    return;
                }
            };

            let mut slot = match polling.lock() {
                Ok(s) => s,
                Err(e) => e.into_inner(),
            };
            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            info!("Polling {} every {:?}", shared.config.name, period);
            let poller = shared.clone();
            *slot = Some(tokio::spawn(async move { poller.poll_loop(period).await }));
        }));
    }

    /// Cancels the startup and the poll task, the link stays untouched.
    pub fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }

        let mut slot = match self.polling.lock() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };
        if let Some(task) = slot.take() {
            task.abort();
            info!("Stopped polling {}", self.shared.config.name);
        }
    }

    pub fn is_polling(&self) -> bool {
        match self.polling.lock() {
            Ok(slot) => slot.as_ref().map_or(false, |t| !t.is_finished()),
            Err(_) => false,
        }
    }

    /// Waits for the startup to finish, mostly useful to observe the outcome.
    pub async fn wait_started(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            let _ = worker.await;
            self.worker = None;
        }
    }

    pub fn status(&self) -> MeterStatus {
        self.shared.status_snapshot()
    }

    pub fn address(&self) -> u8 {
        self.shared.address.load(Ordering::SeqCst)
    }

    /// One cycle over all configured channels, returns how many values were published.
    pub async fn poll_once(&self) -> usize {
        self.shared.poll_cycle().await
    }
}

impl Drop for MeterPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollerShared {
    fn status_snapshot(&self) -> MeterStatus {
        match self.status.read() {
            Ok(s) => s.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn with_status<F: FnOnce(&mut MeterStatus) -> bool>(&self, f: F) -> Option<MeterStatus> {
        let mut status = match self.status.write() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };
        if f(&mut status) {
            return Some(status.clone());
        }
        None
    }

    async fn set_status(&self, status: DeviceStatus, detail: StatusDetail, description: &str) {
        let changed = self.with_status(|s| s.update(status, detail, description));
        if let Some(snapshot) = changed {
            info!("{} is {} ({:?}): {}", self.config.name, snapshot.status.to_string(), snapshot.detail, snapshot.description);
            self.publish_status(snapshot).await;
        }
    }

    async fn publish_status(&self, snapshot: MeterStatus) {
        if self.sender.send(Transmission::Status(snapshot)).await.is_err() {
            debug!("Status of {} not published, channel closed", self.config.name);
        }
    }

    async fn startup(&self) -> bool {
        self.set_status(DeviceStatus::Unknown, StatusDetail::None, "Waiting for energy meter network address").await;

        if let Err(e) = self.link.connect().await {
            if let MercuryError::Configuration(msg) = &e {
                error!("Meter {} cannot start: {}", self.config.name, msg);
                self.set_status(DeviceStatus::Offline, StatusDetail::ConfigurationError, msg).await;
                return false;
            }
            warn!("Connecting {} failed: {}", self.link.name(), e);
        }

        let address = match self.config.address {
            Some(a) => {
                info!("Using configured network address {} for {}", a, self.config.name);
                a
            }
            None => match self.acquire_address().await {
                Some(a) => a,
                None => {
                    self.set_status(DeviceStatus::Offline, StatusDetail::HandlerInitializingError, "Cannot get network address").await;
                    return false;
                }
            },
        };
        self.address.store(address, Ordering::SeqCst);
        self.with_status(|s| {
            s.address = Some(address);
            false
        });

        if self.link.state() != ConnectionState::Connected {
            /* the poll cycles keep reconnecting */
            self.set_status(DeviceStatus::Offline, StatusDetail::CommunicationError, "Powermeter does not answer").await;
            return true;
        }

        self.read_serial_number(address).await;
        self.set_status(DeviceStatus::Online, StatusDetail::None, &format!("Network address is {}", address)).await;
        true
    }

    async fn acquire_address(&self) -> Option<u8> {
        let attempts = self.timing.address_attempts;
        for attempt in 1..=attempts {
            if self.link.state() != ConnectionState::Connected {
                if let Err(e) = self.link.connect().await {
                    debug!("Attempt {}/{} to connect {} failed: {}", attempt, attempts, self.link.name(), e);
                }
            }

            let answer = match self.link.authenticate_and_send(&Command::GetAddress, &self.config.password).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Attempt {}/{} to read the address of {} failed: {}", attempt, attempts, self.config.name, e);
                    Response::empty(ADDRESS_RESPONSE_LEN)
                }
            };

            let address = answer.network_address();
            if address != 0 {
                info!("{} has network address {}", self.config.name, address);
                return Some(address);
            }

            if attempt < attempts {
                tokio::time::sleep(self.timing.address_retry()).await;
            }
        }

        error!("Cannot get network address of {} after {} attempts", self.config.name, attempts);
        None
    }

    async fn read_serial_number(&self, address: u8) {
        let command = Command::SerialNumber { address };
        match self.link.authenticate_and_send(&command, &self.config.password).await {
            Ok(answer) if !answer.is_blank() => {
                let info = answer.serial_info();
                info!("{} has serial number {} ({:?})", self.config.name, info.serial_number, info.manufactured);
                self.with_status(|s| {
                    s.serial_number = Some(info.serial_number.clone());
                    s.manufactured = info.manufactured;
                    false
                });
            }
            Ok(_) => debug!("{} did not report a serial number", self.config.name),
            Err(e) => warn!("Reading the serial number of {} failed: {}", self.config.name, e),
        }
    }

    async fn poll_loop(&self, period: Duration) {
        loop {
            self.poll_cycle().await;
            tokio::time::sleep(period).await;
        }
    }

    async fn ensure_connected(&self) -> bool {
        if self.link.state() == ConnectionState::Connected {
            return true;
        }

        match self.link.connect().await {
            Ok(()) if self.link.state() == ConnectionState::Connected => {
                let address = self.address.load(Ordering::SeqCst);
                self.set_status(DeviceStatus::Online, StatusDetail::None, &format!("Network address is {}", address)).await;
                true
            }
            Ok(()) => {
                debug!("{} is still connecting, skipping this cycle", self.link.name());
                false
            }
            Err(e) => {
                let detail = match e {
                    MercuryError::Configuration(_) => StatusDetail::ConfigurationError,
                    _ => StatusDetail::CommunicationError,
                };
                self.set_status(DeviceStatus::Offline, detail, &e.to_string()).await;
                false
            }
        }
    }

    async fn poll_cycle(&self) -> usize {
        if !self.ensure_connected().await {
            return 0;
        }

        let address = self.address.load(Ordering::SeqCst);
        let sampler = ValueSampler::new(self.link.as_ref(), &self.config.password, &self.timing);
        let mut data = MeteringData::new(DeviceProtocol::Mercury, &self.config.name);

        for channel in self.config.channels.iter() {
            let reading = match sampler.sample(*channel, address).await {
                Some(r) => r,
                None => continue,
            };
            if let Err(e) = insert_reading(&mut data, &reading) {
                error!("Cannot publish {} of {}: {}", channel.id(), self.config.name, e);
            }
        }

        let count = data.metered_values.len() / 2;
        if count == 0 {
            debug!("Nothing to publish for {}", self.config.name);
            return 0;
        }

        if self.sender.send(Transmission::Metering(data)).await.is_err() {
            warn!("Readings of {} dropped, channel closed", self.config.name);
            return 0;
        }
        self.with_status(|s| {
            s.seen();
            false
        });
        count
    }
}
