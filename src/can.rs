//! CAN plane: frame types, the driver seam, and bounded transmit/receive.
//!
//! The driver only offers non-blocking operations (`nb::Result`, the same shape
//! as the TWAI peripheral). [`CanPlane`] turns those into waits bounded by a
//! timeout by polling on an `embassy-time` timer, so no lock is ever held
//! across a suspension point and the sender and receiver can share one plane.

use core::fmt;

use embassy_time::{Duration, Instant, Timer};

/// Largest 11-bit identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest 29-bit identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit.
pub const MAX_DLC: usize = 8;

/// The only bit rate this node runs at.
pub const BITRATE_500K: u32 = 500_000;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// CAN identifier owned by this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Option<Self> {
        if raw > MAX_EXTENDED_ID {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Identifiers above 0x7FF need the 29-bit frame format.
    pub const fn is_extended(self) -> bool {
        self.0 > MAX_STANDARD_ID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// One classic CAN 2.0 data frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    dlc: u8,
    data: [u8; MAX_DLC],
}

impl CanFrame {
    /// Build a frame. `None` if the id does not fit its format or the payload
    /// is longer than 8 bytes.
    pub fn new(id: u32, extended: bool, payload: &[u8]) -> Option<Self> {
        let limit = if extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if id > limit || payload.len() > MAX_DLC {
            return None;
        }
        let mut data = [0u8; MAX_DLC];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            extended,
            dlc: payload.len() as u8,
            data,
        })
    }

    /// Frame addressed with this node's identity.
    pub fn from_node(node: NodeId, payload: &[u8]) -> Option<Self> {
        Self::new(node.raw(), node.is_extended(), payload)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn dlc(&self) -> usize {
        self.dlc as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame(id=0x{:X}, data={:?})", self.id, self.data())
    }
}

/// Controller state as reported in a [`BusStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusState {
    Running,
    Recovering,
    BusOff,
    Stopped,
}

impl BusState {
    pub fn as_str(self) -> &'static str {
        match self {
            BusState::Running => "RUNNING",
            BusState::Recovering => "RECOVERING",
            BusState::BusOff => "BUS_OFF",
            BusState::Stopped => "STOPPED",
        }
    }
}

/// Read-only snapshot of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusStatus {
    pub state: BusState,
    pub tx_error_count: u8,
    pub rx_error_count: u8,
}

impl BusStatus {
    pub const STOPPED: Self = Self {
        state: BusState::Stopped,
        tx_error_count: 0,
        rx_error_count: 0,
    };
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} tec={} rec={}",
            self.state.as_str(),
            self.tx_error_count,
            self.rx_error_count
        )
    }
}

/// Acceptance filter. The node observes every peer, so only accept-all exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    AcceptAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
}

/// Driver configuration applied by [`CanPlane::install`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanConfig {
    pub bitrate: u32,
    pub filter: Filter,
    pub mode: Mode,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            bitrate: BITRATE_500K,
            filter: Filter::AcceptAll,
            mode: Mode::Normal,
        }
    }
}

impl CanConfig {
    /// Bit rates the TWAI timing tables cover.
    pub fn validate(&self) -> Result<(), CanError> {
        match self.bitrate {
            125_000 | 250_000 | 500_000 | 1_000_000 => Ok(()),
            _ => Err(CanError::HardwareInit),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CanError {
    /// Driver rejected the configuration.
    HardwareInit,
    /// `start` before `install`, or an operation on a stopped controller.
    NotStarted,
    /// Hardware queue did not drain in time.
    TxTimeout,
    /// Controller is bus-off.
    BusOff,
    /// Nothing arrived in time.
    RxTimeout,
    /// Frame the driver cannot represent.
    InvalidFrame,
}

impl fmt::Display for CanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanError::HardwareInit => write!(f, "driver rejected configuration"),
            CanError::NotStarted => write!(f, "controller not started"),
            CanError::TxTimeout => write!(f, "transmit timeout"),
            CanError::BusOff => write!(f, "bus off"),
            CanError::RxTimeout => write!(f, "receive timeout"),
            CanError::InvalidFrame => write!(f, "invalid frame"),
        }
    }
}

/// Transceiver driver contract.
///
/// Every method takes `&self`: implementations synchronize internally so the
/// transmit and receive paths can be used from different activities.
pub trait CanDriver {
    /// Apply bit timing, filter and mode. Called once, before `start`.
    fn install(&self, config: &CanConfig) -> Result<(), CanError>;

    /// Activate the controller.
    fn start(&self) -> Result<(), CanError>;

    /// Queue a frame if a transmit slot is free.
    fn try_transmit(&self, frame: &CanFrame) -> nb::Result<(), CanError>;

    /// Pop one frame from the receive FIFO if any is waiting.
    fn try_receive(&self) -> nb::Result<CanFrame, CanError>;

    fn status(&self) -> BusStatus;

    /// Restart a bus-off controller.
    fn recover(&self) -> Result<(), CanError>;
}

/// Bounded blocking primitives over a [`CanDriver`].
pub struct CanPlane<D> {
    driver: D,
}

impl<D: CanDriver> CanPlane<D> {
    /// Validate `config` and hand it to the driver.
    pub fn install(driver: D, config: &CanConfig) -> Result<Self, CanError> {
        config.validate()?;
        driver.install(config)?;
        log::info!(
            target: crate::config::TAG,
            "can: installed ({} bit/s, {:?}, {:?})",
            config.bitrate,
            config.filter,
            config.mode
        );
        Ok(Self { driver })
    }

    pub fn start(&self) -> Result<(), CanError> {
        self.driver.start()?;
        log::info!(target: crate::config::TAG, "can: controller started");
        Ok(())
    }

    /// Queue `frame`, waiting at most `timeout` for a free transmit slot.
    pub async fn transmit(&self, frame: &CanFrame, timeout: Duration) -> Result<(), CanError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.driver.status().state == BusState::BusOff {
                return Err(CanError::BusOff);
            }
            match self.driver.try_transmit(frame) {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(CanError::TxTimeout);
            }
            Timer::after(POLL_INTERVAL).await;
        }
    }

    /// Next frame from the bus, or [`CanError::RxTimeout`] after `timeout`.
    pub async fn receive(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.driver.try_receive() {
                Ok(frame) => return Ok(frame),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return Err(CanError::RxTimeout);
            }
            Timer::after(POLL_INTERVAL).await;
        }
    }

    pub fn status(&self) -> BusStatus {
        self.driver.status()
    }

    pub fn recover(&self) -> Result<(), CanError> {
        log::warn!(target: crate::config::TAG, "can: bus off, restarting controller");
        self.driver.recover()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
