//! [`CanDriver`] over the ESP32 TWAI controller.
//!
//! The controller moves through `Idle` (peripheral and pins only) →
//! `Installed` (timing and filter applied) → `Running`. It is kept in a
//! `critical_section::Mutex` so the sender on core 0 and the receiver on
//! core 1 can both reach it; every method holds the lock for one
//! non-blocking register operation only.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_can::{Frame, Id};
use esp_hal::gpio::AnyPin;
use esp_hal::peripherals::TWAI0;
use esp_hal::twai::{
    self, BaudRate, EspTwaiError, EspTwaiFrame, ExtendedId as EspExtendedId,
    StandardId as EspStandardId, Twai, TwaiConfiguration, TwaiMode,
};
use esp_hal::Blocking;

use crate::can::{BusState, BusStatus, CanConfig, CanDriver, CanError, CanFrame, Mode};

enum TwaiState {
    Idle {
        peripheral: TWAI0<'static>,
        rx: AnyPin<'static>,
        tx: AnyPin<'static>,
    },
    Installed(TwaiConfiguration<'static, Blocking>),
    Running {
        twai: Twai<'static, Blocking>,
        /// Set by `recover`, cleared once the controller leaves bus-off.
        recovering: bool,
    },
    /// Left behind if a transition is interrupted; every operation fails.
    Poisoned,
}

pub struct TwaiDriver {
    state: Mutex<RefCell<TwaiState>>,
}

impl TwaiDriver {
    pub fn new(peripheral: TWAI0<'static>, rx: AnyPin<'static>, tx: AnyPin<'static>) -> Self {
        Self {
            state: Mutex::new(RefCell::new(TwaiState::Idle { peripheral, rx, tx })),
        }
    }
}

fn baud_rate(bitrate: u32) -> Result<BaudRate, CanError> {
    match bitrate {
        125_000 => Ok(BaudRate::B125K),
        250_000 => Ok(BaudRate::B250K),
        500_000 => Ok(BaudRate::B500K),
        1_000_000 => Ok(BaudRate::B1000K),
        _ => Err(CanError::HardwareInit),
    }
}

fn to_esp(frame: &CanFrame) -> Result<EspTwaiFrame, CanError> {
    let esp = if frame.is_extended() {
        let id = EspExtendedId::new(frame.id()).ok_or(CanError::InvalidFrame)?;
        EspTwaiFrame::new(id, frame.data())
    } else {
        let id = EspStandardId::new(frame.id() as u16).ok_or(CanError::InvalidFrame)?;
        EspTwaiFrame::new(id, frame.data())
    };
    esp.ok_or(CanError::InvalidFrame)
}

fn from_esp(frame: &EspTwaiFrame) -> Result<CanFrame, CanError> {
    let (id, extended) = match Frame::id(frame) {
        Id::Standard(id) => (id.as_raw() as u32, false),
        Id::Extended(id) => (id.as_raw(), true),
    };
    let len = frame.dlc();
    CanFrame::new(id, extended, &frame.data()[..len]).ok_or(CanError::InvalidFrame)
}

fn map_error(e: EspTwaiError) -> CanError {
    match e {
        EspTwaiError::BusOff => CanError::BusOff,
        _ => CanError::InvalidFrame,
    }
}

impl CanDriver for TwaiDriver {
    fn install(&self, config: &CanConfig) -> Result<(), CanError> {
        let baud = baud_rate(config.bitrate)?;
        let mode = match config.mode {
            Mode::Normal => TwaiMode::Normal,
        };

        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match core::mem::replace(&mut *state, TwaiState::Poisoned) {
                TwaiState::Idle { peripheral, rx, tx } => {
                    let mut twai_config = TwaiConfiguration::new(peripheral, rx, tx, baud, mode);
                    // Every identifier bit is "don't care": accept all frames.
                    twai_config.set_filter(
                        const {
                            twai::filter::SingleStandardFilter::new(
                                b"xxxxxxxxxxx",
                                b"x",
                                [b"xxxxxxxx", b"xxxxxxxx"],
                            )
                        },
                    );
                    *state = TwaiState::Installed(twai_config);
                    Ok(())
                }
                other => {
                    *state = other;
                    Err(CanError::HardwareInit)
                }
            }
        })
    }

    fn start(&self) -> Result<(), CanError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match core::mem::replace(&mut *state, TwaiState::Poisoned) {
                TwaiState::Installed(twai_config) => {
                    *state = TwaiState::Running {
                        twai: twai_config.start(),
                        recovering: false,
                    };
                    Ok(())
                }
                other => {
                    *state = other;
                    Err(CanError::NotStarted)
                }
            }
        })
    }

    fn try_transmit(&self, frame: &CanFrame) -> nb::Result<(), CanError> {
        let esp = to_esp(frame).map_err(nb::Error::Other)?;
        critical_section::with(|cs| match &mut *self.state.borrow_ref_mut(cs) {
            TwaiState::Running { twai, .. } => twai.transmit(&esp).map_err(|e| match e {
                nb::Error::WouldBlock => nb::Error::WouldBlock,
                nb::Error::Other(e) => nb::Error::Other(map_error(e)),
            }),
            _ => Err(nb::Error::Other(CanError::NotStarted)),
        })
    }

    fn try_receive(&self) -> nb::Result<CanFrame, CanError> {
        critical_section::with(|cs| match &mut *self.state.borrow_ref_mut(cs) {
            TwaiState::Running { twai, .. } => match twai.receive() {
                Ok(frame) => from_esp(&frame).map_err(nb::Error::Other),
                Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
                Err(nb::Error::Other(e)) => Err(nb::Error::Other(map_error(e))),
            },
            _ => Err(nb::Error::Other(CanError::NotStarted)),
        })
    }

    fn status(&self) -> BusStatus {
        critical_section::with(|cs| match &mut *self.state.borrow_ref_mut(cs) {
            TwaiState::Running { twai, recovering } => {
                let state = if !twai.is_bus_off() {
                    *recovering = false;
                    BusState::Running
                } else if *recovering {
                    BusState::Recovering
                } else {
                    BusState::BusOff
                };
                BusStatus {
                    state,
                    tx_error_count: twai.transmit_error_count(),
                    rx_error_count: twai.receive_error_count(),
                }
            }
            _ => BusStatus::STOPPED,
        })
    }

    fn recover(&self) -> Result<(), CanError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match core::mem::replace(&mut *state, TwaiState::Poisoned) {
                TwaiState::Running { twai, .. } => {
                    // Leaving reset mode starts the 128 x 11 recessive bit
                    // recovery sequence in hardware.
                    *state = TwaiState::Running {
                        twai: twai.stop().start(),
                        recovering: true,
                    };
                    Ok(())
                }
                other => {
                    *state = other;
                    Err(CanError::NotStarted)
                }
            }
        })
    }
}
