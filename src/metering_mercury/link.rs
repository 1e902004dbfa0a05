use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;

use crate::config::{BusConfig, BusTransport, TimingConfig};
use super::frame::{parse_response, password_digits, Command, Response, AUTH_RESPONSE_LEN, TEST_CONNECTION_LEN};
use super::MercuryError;

/// Anything bytes can be written to and read from, a serial line or a TCP gateway.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

pub type BoxedPort = Box<dyn SerialIo>;

const STALE_DRAIN_CHUNKS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Resolves and opens the endpoint of a bus.
#[async_trait]
pub trait PortOpener: Send + Sync {
    fn resolve(&self, endpoint: &str) -> bool;
    async fn open(&self, endpoint: &str, baud_rate: u32) -> Result<BoxedPort, MercuryError>;
}

pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    fn resolve(&self, endpoint: &str) -> bool {
        if std::path::Path::new(endpoint).exists() {
            return true;
        }

        /* COM ports and friends only show up in the port list */
        match tokio_serial::available_ports() {
            Ok(ports) => ports.iter().any(|p| p.port_name == endpoint),
            Err(e) => {
                warn!("Unable to list serial ports: {}", e);
                false
            }
        }
    }

    async fn open(&self, endpoint: &str, baud_rate: u32) -> Result<BoxedPort, MercuryError> {
        let port = tokio_serial::new(endpoint, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
            .map_err(|e| MercuryError::Communication(format!("Cannot open {}: {}", endpoint, e)))?;
        Ok(Box::new(port))
    }
}

/// RS-485 to Ethernet converters, the endpoint is `host:port`.
#[cfg(feature = "tcp")]
pub struct TcpOpener;

#[cfg(feature = "tcp")]
#[async_trait]
impl PortOpener for TcpOpener {
    fn resolve(&self, endpoint: &str) -> bool {
        match endpoint.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        }
    }

    async fn open(&self, endpoint: &str, _baud_rate: u32) -> Result<BoxedPort, MercuryError> {
        let stream = tokio::net::TcpStream::connect(endpoint)
            .await
            .map_err(|e| MercuryError::Communication(format!("Failed to connect to {}: {}", endpoint, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Cannot disable Nagle on {}: {}", endpoint, e);
        }
        Ok(Box::new(stream))
    }
}

/// The authenticated request/response exchange with the meters of one bus.
#[async_trait]
pub trait MeterLink: Send + Sync {
    /// Opens the bus and probes it. Calls made while a connect is running
    /// return immediately.
    async fn connect(&self) -> Result<(), MercuryError>;

    /// Sends the password and, if the meter accepts it, the command. Both
    /// frames go out under one bus lock.
    async fn authenticate_and_send(&self, command: &Command, password: &str) -> Result<Response, MercuryError>;

    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn name(&self) -> &str;
}

pub struct SerialLink {
    endpoint: String,
    baud_rate: u32,
    timing: TimingConfig,
    opener: Box<dyn PortOpener>,
    port: Mutex<Option<BoxedPort>>,
    state: StdMutex<ConnectionState>,
    connecting: Mutex<()>,
}

impl SerialLink {
    pub fn new(endpoint: String, baud_rate: u32, timing: TimingConfig, opener: Box<dyn PortOpener>) -> Self {
        return SerialLink {
            endpoint,
            baud_rate,
            timing,
            opener,
            port: Mutex::new(None),
            state: StdMutex::new(ConnectionState::Disconnected),
            connecting: Mutex::new(()),
        };
    }

    pub fn from_bus(bus: &BusConfig) -> Self {
        let opener: Box<dyn PortOpener> = match bus.transport {
            BusTransport::Serial => Box::new(SerialOpener),
            #[cfg(feature = "tcp")]
            BusTransport::Tcp => Box::new(TcpOpener),
            #[cfg(not(feature = "tcp"))]
            BusTransport::Tcp => {
                error!("Bus {} wants TCP but the tcp feature is disabled, falling back to serial", bus.name);
                Box::new(SerialOpener)
            }
        };
        return SerialLink::new(bus.port.clone(), bus.baud_rate, bus.timing.clone(), opener);
    }

    fn set_state(&self, state: ConnectionState) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *s != state {
            debug!("Link {} {:?} -> {:?}", self.endpoint, *s, state);
        }
        *s = state;
    }

    /// Writes the frame and collects the answer. Never fails: I/O errors give
    /// an all zero answer and drop the link to `Disconnected`.
    pub async fn raw_exchange(&self, frame: &[u8], expected_len: usize) -> Response {
        let mut port = self.port.lock().await;
        return self.exchange_locked(&mut port, frame, expected_len).await;
    }

    async fn exchange_locked(&self, port: &mut Option<BoxedPort>, frame: &[u8], expected_len: usize) -> Response {
        let io = match port.as_mut() {
            Some(io) => io,
            None => {
                debug!("No open port on {}, skipping exchange", self.endpoint);
                return Response::empty(expected_len);
            }
        };

        match self.transfer(io, frame, expected_len).await {
            Ok(answer) => parse_response(&answer, expected_len),
            Err(e) => {
                error!("I/O error on {}: {}", self.endpoint, e);
                *port = None;
                self.set_state(ConnectionState::Disconnected);
                Response::empty(expected_len)
            }
        }
    }

    /// Throws away whatever a meter sent after the previous answer was complete.
    async fn discard_stale_input(&self, io: &mut BoxedPort) {
        let mut chunk = [0u8; 64];
        let mut stale = Vec::new();
        for _ in 0..STALE_DRAIN_CHUNKS {
            match tokio::time::timeout(Duration::ZERO, io.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => stale.extend_from_slice(&chunk[..n]),
                /* nothing buffered, or the error shows up on the write */
                _ => break,
            }
        }
        if !stale.is_empty() {
            debug!("discard: {}", hex::encode_upper(&stale));
        }
    }

    async fn transfer(&self, io: &mut BoxedPort, frame: &[u8], expected_len: usize) -> std::io::Result<Vec<u8>> {
        self.discard_stale_input(io).await;
        debug!("   send: {}", hex::encode_upper(frame));
        io.write_all(frame).await?;
        io.flush().await?;

        /* the meter can not answer faster than the bus turns around */
        tokio::time::sleep(self.timing.settle_delay()).await;

        let mut answer = Vec::with_capacity(expected_len);
        let mut chunk = [0u8; 64];
        let mut attempts = 0;
        while answer.len() < expected_len && attempts < self.timing.max_read_attempts {
            attempts += 1;
            match tokio::time::timeout(self.timing.read_timeout(), io.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "port closed"));
                }
                Ok(Ok(n)) => {
                    let take = std::cmp::min(n, expected_len - answer.len());
                    answer.extend_from_slice(&chunk[..take]);
                    if n > take {
                        debug!("Dropping {} surplus bytes from {}", n - take, self.endpoint);
                    }
                }
                Ok(Err(e)) => return Err(e),
                /* nothing more is coming */
                Err(_) => break,
            }
        }

        debug!("receive: {}", hex::encode_upper(&answer));
        if answer.len() < expected_len {
            debug!("Short answer on {}: {} of {} bytes", self.endpoint, answer.len(), expected_len);
        }
        Ok(answer)
    }
}

#[async_trait]
impl MeterLink for SerialLink {
    async fn connect(&self) -> Result<(), MercuryError> {
        let _guard = match self.connecting.try_lock() {
            Ok(g) => g,
            Err(_) => {
                debug!("Connect on {} already running, ignoring", self.endpoint);
                return Ok(());
            }
        };

        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        if self.endpoint.trim().is_empty() {
            self.set_state(ConnectionState::Disconnected);
            return Err(MercuryError::Configuration("Port must be set!".to_string()));
        }

        if !self.opener.resolve(&self.endpoint) {
            self.set_state(ConnectionState::Disconnected);
            return Err(MercuryError::Configuration(format!("Port {} is unknown!", self.endpoint)));
        }

        self.set_state(ConnectionState::Connecting);
        info!("Opening {} at {} baud", self.endpoint, self.baud_rate);

        let opened = match self.opener.open(&self.endpoint, self.baud_rate).await {
            Ok(p) => p,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut port = self.port.lock().await;
        *port = Some(opened);

        let probe = Command::TestConnection;
        let answer = self.exchange_locked(&mut port, &probe.request(), TEST_CONNECTION_LEN).await;
        if port.is_some() && answer.acknowledged() {
            self.set_state(ConnectionState::Connected);
            info!("Link {} is connected", self.endpoint);
            return Ok(());
        }

        *port = None;
        self.set_state(ConnectionState::Disconnected);
        Err(MercuryError::Communication("Powermeter does not answer".to_string()))
    }

    async fn authenticate_and_send(&self, command: &Command, password: &str) -> Result<Response, MercuryError> {
        let digits = password_digits(password)
            .ok_or_else(|| MercuryError::Auth("the password must have exactly 6 digits".to_string()))?;

        if self.state() != ConnectionState::Connected {
            return Err(MercuryError::Communication(format!("{} is not connected", self.endpoint)));
        }

        let mut port = self.port.lock().await;
        let auth = self.exchange_locked(&mut port, &Command::Authenticate(digits).request(), AUTH_RESPONSE_LEN).await;
        if port.is_none() {
            return Err(MercuryError::Communication(format!("Lost {} while authenticating", self.endpoint)));
        }

        if !auth.acknowledged() {
            return Err(MercuryError::Auth(format!("meter rejected the password (code {:#04x})", auth.byte(1))));
        }

        Ok(self.exchange_locked(&mut port, &command.request(), command.expected_len()).await)
    }

    async fn disconnect(&self) {
        info!("disconnecting port {}...", self.endpoint);
        let mut port = self.port.lock().await;
        if let Some(mut io) = port.take() {
            if let Err(e) = io.shutdown().await {
                debug!("Closing {} failed: {}", self.endpoint, e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected port {}", self.endpoint);
    }

    fn state(&self) -> ConnectionState {
        return *self.state.lock().unwrap_or_else(|e| e.into_inner());
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}
