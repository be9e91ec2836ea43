//! In-memory CAN driver.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::can::{BusState, BusStatus, CanConfig, CanDriver, CanError, CanFrame};

#[derive(Default)]
pub struct FakeCan {
    installed: Cell<bool>,
    started: Cell<bool>,
    bus_off: Cell<bool>,
    /// Transmit slot stays occupied; every transmit would block.
    tx_busy: Cell<bool>,
    heal_on_recover: Cell<bool>,
    recover_calls: Cell<u32>,
    status_reads: Cell<u32>,
    tx_error_count: Cell<u8>,
    sent: RefCell<Vec<CanFrame>>,
    inbox: RefCell<VecDeque<CanFrame>>,
}

impl FakeCan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rx(&self, frame: CanFrame) {
        self.inbox.borrow_mut().push_back(frame);
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.sent.borrow().clone()
    }

    /// Put the controller into (or out of) bus-off.
    pub fn set_bus_off(&self, bus_off: bool) {
        self.bus_off.set(bus_off);
        self.tx_error_count.set(if bus_off { 255 } else { 0 });
    }

    pub fn set_tx_busy(&self, busy: bool) {
        self.tx_busy.set(busy);
    }

    /// Make `recover` clear bus-off instead of leaving the fault in place.
    pub fn heal_on_recover(&self) {
        self.heal_on_recover.set(true);
    }

    pub fn recover_calls(&self) -> u32 {
        self.recover_calls.get()
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }
}

impl CanDriver for FakeCan {
    fn install(&self, _config: &CanConfig) -> Result<(), CanError> {
        if self.installed.get() {
            return Err(CanError::HardwareInit);
        }
        self.installed.set(true);
        Ok(())
    }

    fn start(&self) -> Result<(), CanError> {
        if !self.installed.get() {
            return Err(CanError::NotStarted);
        }
        self.started.set(true);
        Ok(())
    }

    fn try_transmit(&self, frame: &CanFrame) -> nb::Result<(), CanError> {
        if !self.started.get() {
            return Err(nb::Error::Other(CanError::NotStarted));
        }
        if self.bus_off.get() {
            return Err(nb::Error::Other(CanError::BusOff));
        }
        if self.tx_busy.get() {
            return Err(nb::Error::WouldBlock);
        }
        self.sent.borrow_mut().push(*frame);
        Ok(())
    }

    fn try_receive(&self) -> nb::Result<CanFrame, CanError> {
        if !self.started.get() {
            return Err(nb::Error::Other(CanError::NotStarted));
        }
        self.inbox
            .borrow_mut()
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }

    fn status(&self) -> BusStatus {
        self.status_reads.set(self.status_reads.get() + 1);
        if !self.started.get() {
            return BusStatus::STOPPED;
        }
        BusStatus {
            state: if self.bus_off.get() {
                BusState::BusOff
            } else {
                BusState::Running
            },
            tx_error_count: self.tx_error_count.get(),
            rx_error_count: 0,
        }
    }

    fn recover(&self) -> Result<(), CanError> {
        if !self.started.get() {
            return Err(CanError::NotStarted);
        }
        self.recover_calls.set(self.recover_calls.get() + 1);
        if self.heal_on_recover.get() {
            self.set_bus_off(false);
        }
        Ok(())
    }
}

/// Started plane over a fresh fake driver.
pub fn started_plane() -> crate::can::CanPlane<FakeCan> {
    let plane = crate::can::CanPlane::install(FakeCan::new(), &CanConfig::default())
        .expect("install");
    plane.start().expect("start");
    plane
}
