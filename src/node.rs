//! The two long-lived activities and the mode decision that picks them.
//!
//! Each activity exposes a `step` that performs exactly one iteration and
//! reports what happened, and a `run` loop around it. The firmware spawns the
//! `run` loops as embassy tasks; the host tests drive `step` directly.

use embassy_time::{Duration, Timer};
use rand_core::RngCore;

use crate::can::{BusStatus, CanDriver, CanError, CanFrame, CanPlane, NodeId};
use crate::config::TAG;
use crate::http::HttpTransport;
use crate::link::{LinkState, LinkSupervisor};
use crate::publisher::{draw_value, PublishOutcome, Publisher};

pub const SEND_PERIOD: Duration = Duration::from_secs(1);
pub const TX_TIMEOUT: Duration = Duration::from_millis(1000);
pub const RX_TIMEOUT: Duration = Duration::from_millis(2000);

/// A sample is published on every iteration divisible by this.
pub const PUBLISH_EVERY: u32 = 5;

const RX_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// `[iteration, iteration + 1]`, both truncated to a byte.
pub fn heartbeat_payload(iteration: u32) -> [u8; 2] {
    [iteration as u8, iteration.wrapping_add(1) as u8]
}

pub fn heartbeat_frame(node: NodeId, iteration: u32) -> Option<CanFrame> {
    CanFrame::from_node(node, &heartbeat_payload(iteration))
}

/// Which activities run after boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Sender and receiver.
    Full,
    /// Link permanently failed: receiver only.
    CanOnly,
}

impl Mode {
    pub fn runs_sender(self) -> bool {
        self == Mode::Full
    }
}

pub fn select_mode(state: LinkState) -> Mode {
    match state {
        LinkState::Connected => Mode::Full,
        _ => Mode::CanOnly,
    }
}

/// Block until the link settles, then decide the run mode.
pub async fn wait_for_mode(link: &LinkSupervisor) -> Mode {
    let state = match link.wait_ready(None).await {
        Ok(state) => state,
        Err(e) => {
            log::error!(target: TAG, "node: {}", e);
            link.state()
        }
    };
    log::info!(target: TAG, "node: link settled in {}", state.as_str());
    let mode = select_mode(state);
    match mode {
        Mode::Full => log::info!(target: TAG, "node: link up, starting sender and receiver"),
        Mode::CanOnly => log::warn!(target: TAG, "node: link failed, running CAN receiver only"),
    }
    mode
}

/// Result of one sender iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendReport {
    pub iteration: u32,
    pub transmit: Result<(), CanError>,
    /// `None` on iterations that do not publish.
    pub publish: Option<PublishOutcome>,
    pub status: BusStatus,
}

pub struct SenderActivity<'a, D, T, R> {
    can: &'a CanPlane<D>,
    publisher: Publisher<'a, T>,
    rng: R,
    node: NodeId,
    iteration: u32,
}

impl<'a, D, T, R> SenderActivity<'a, D, T, R>
where
    D: CanDriver,
    T: HttpTransport,
    R: RngCore,
{
    pub fn new(can: &'a CanPlane<D>, publisher: Publisher<'a, T>, rng: R, node: NodeId) -> Self {
        Self {
            can,
            publisher,
            rng,
            node,
            iteration: 0,
        }
    }

    pub fn publisher(&self) -> &Publisher<'a, T> {
        &self.publisher
    }

    /// Transmit, maybe publish, report status. The publish only starts once
    /// the transmit has returned.
    pub async fn step(&mut self) -> SendReport {
        let iteration = self.iteration;

        let transmit = match heartbeat_frame(self.node, iteration) {
            Some(frame) => {
                let result = self.can.transmit(&frame, TX_TIMEOUT).await;
                if result.is_ok() {
                    log::info!(
                        target: TAG,
                        "can: TX id={} data={:02X?}",
                        self.node,
                        frame.data()
                    );
                }
                result
            }
            None => Err(CanError::InvalidFrame),
        };

        match transmit {
            Ok(()) => {}
            Err(CanError::BusOff) => {
                log::error!(target: TAG, "can: TX failed: {}", CanError::BusOff);
                if let Err(e) = self.can.recover() {
                    log::error!(target: TAG, "can: recovery failed: {}", e);
                }
            }
            Err(e) => log::error!(target: TAG, "can: TX failed: {}", e),
        }

        let publish = if iteration % PUBLISH_EVERY == 0 {
            let value = draw_value(&mut self.rng);
            Some(self.publisher.publish(value).await)
        } else {
            None
        };

        let status = self.can.status();
        log::info!(target: TAG, "can: {}", status);

        self.iteration = iteration.wrapping_add(1);

        SendReport {
            iteration,
            transmit,
            publish,
            status,
        }
    }

    pub async fn run(&mut self) -> ! {
        log::info!(target: TAG, "node: sender started as {}", self.node);
        loop {
            self.step().await;
            Timer::after(SEND_PERIOD).await;
        }
    }
}

/// Result of one receiver iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Peer frame, logged together with the bus status read after it.
    Observed(CanFrame, BusStatus),
    /// Our own frame; dropped without side effects.
    SelfEcho,
    /// Nothing arrived within the receive timeout.
    Idle,
    Error(CanError),
}

pub struct ReceiverActivity<'a, D> {
    can: &'a CanPlane<D>,
    node: NodeId,
}

impl<'a, D: CanDriver> ReceiverActivity<'a, D> {
    pub fn new(can: &'a CanPlane<D>, node: NodeId) -> Self {
        Self { can, node }
    }

    pub async fn step(&mut self) -> ReceiveOutcome {
        match self.can.receive(RX_TIMEOUT).await {
            Ok(frame) if frame.id() == self.node.raw() => ReceiveOutcome::SelfEcho,
            Ok(frame) => {
                log::info!(
                    target: TAG,
                    "can: RX id=0x{:X} data={:02X?}",
                    frame.id(),
                    frame.data()
                );
                let status = self.can.status();
                log::info!(target: TAG, "can: {}", status);
                ReceiveOutcome::Observed(frame, status)
            }
            Err(CanError::RxTimeout) => ReceiveOutcome::Idle,
            Err(e) => {
                log::warn!(target: TAG, "can: RX failed: {}", e);
                ReceiveOutcome::Error(e)
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        log::info!(target: TAG, "node: receiver started as {}", self.node);
        loop {
            if let ReceiveOutcome::Error(_) = self.step().await {
                Timer::after(RX_ERROR_BACKOFF).await;
            }
        }
    }
}
