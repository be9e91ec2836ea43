//! WiFi link supervisor.
//!
//! Tracks the station association lifecycle and exposes the single bit the
//! rest of the node cares about: whether IP traffic can flow right now.
//!
//! State and retry counter live in one `AtomicU16` so the WiFi task can move
//! both in a single compare-and-swap while any other task reads them.
//! Format: upper 8 bits = retry count, lower 8 bits = [`LinkState`].

use core::fmt;
use core::sync::atomic::{AtomicU16, Ordering};

use embassy_time::{with_timeout, Duration, Timer};

use crate::config::TAG;

/// Disassociations tolerated before giving up for good.
pub const MAX_RETRIES: u8 = 5;

const WAIT_POLL: Duration = Duration::from_millis(50);
const RETRY_SHIFT: u16 = 8;
const STATE_MASK: u16 = 0xFF;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Init = 0,
    Associating = 1,
    Connected = 2,
    PermanentlyFailed = 3,
}

impl From<u8> for LinkState {
    fn from(v: u8) -> Self {
        match v {
            1 => LinkState::Associating,
            2 => LinkState::Connected,
            3 => LinkState::PermanentlyFailed,
            _ => LinkState::Init,
        }
    }
}

impl LinkState {
    /// States `wait_ready` returns on.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::PermanentlyFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Init => "INIT",
            LinkState::Associating => "ASSOCIATING",
            LinkState::Connected => "CONNECTED",
            LinkState::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }
}

/// What the WiFi task should do after a disassociation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconnect {
    /// Try again; `attempt` is the retry count after this event.
    Retry { attempt: u8 },
    /// Budget exhausted, the link is permanently down.
    GiveUp,
    /// Event arrived in a state where it means nothing (before `start`, after
    /// giving up).
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// `wait_ready` expired before a terminal state.
    WaitTimeout,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::WaitTimeout => write!(f, "timed out waiting for link"),
        }
    }
}

const fn pack(state: LinkState, retries: u8) -> u16 {
    ((retries as u16) << RETRY_SHIFT) | state as u16
}

fn unpack(word: u16) -> (LinkState, u8) {
    (
        LinkState::from((word & STATE_MASK) as u8),
        (word >> RETRY_SHIFT) as u8,
    )
}

pub struct LinkSupervisor {
    word: AtomicU16,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSupervisor {
    pub const fn new() -> Self {
        Self {
            word: AtomicU16::new(pack(LinkState::Init, 0)),
        }
    }

    /// INIT → ASSOCIATING. Returns `true` only for the call that made the move.
    pub fn start(&self) -> bool {
        let started = self
            .word
            .compare_exchange(
                pack(LinkState::Init, 0),
                pack(LinkState::Associating, 0),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if started {
            log::info!(target: TAG, "wifi: association started");
        }
        started
    }

    pub fn state(&self) -> LinkState {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    pub fn retries(&self) -> u8 {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// `ip_ready`: associated and holding a lease.
    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Driver reported an IP lease. ASSOCIATING → CONNECTED, retries reset.
    pub fn on_got_ip(&self) -> LinkState {
        let result = self.update(|state, _| match state {
            LinkState::Associating => Some(pack(LinkState::Connected, 0)),
            _ => None,
        });
        match result {
            Ok((LinkState::Connected, _)) => {
                log::info!(target: TAG, "wifi: link ready");
                LinkState::Connected
            }
            Ok((state, _)) | Err((state, _)) => state,
        }
    }

    /// Driver reported a disassociation or a failed association attempt.
    pub fn on_disconnected(&self) -> Reconnect {
        let result = self.update(|state, retries| match state {
            LinkState::Associating | LinkState::Connected => {
                let retries = retries.saturating_add(1).min(MAX_RETRIES);
                if retries >= MAX_RETRIES {
                    Some(pack(LinkState::PermanentlyFailed, retries))
                } else {
                    Some(pack(LinkState::Associating, retries))
                }
            }
            LinkState::Init | LinkState::PermanentlyFailed => None,
        });

        match result {
            Ok((LinkState::PermanentlyFailed, _)) => {
                log::error!(
                    target: TAG,
                    "wifi: connection failed after {} attempts",
                    MAX_RETRIES
                );
                Reconnect::GiveUp
            }
            Ok((_, attempt)) => {
                log::info!(
                    target: TAG,
                    "wifi: disconnected, retrying ({}/{})",
                    attempt,
                    MAX_RETRIES
                );
                Reconnect::Retry { attempt }
            }
            Err(_) => Reconnect::Ignored,
        }
    }

    /// Wait until CONNECTED or PERMANENTLY_FAILED. `None` waits forever.
    pub async fn wait_ready(&self, timeout: Option<Duration>) -> Result<LinkState, LinkError> {
        let wait = async {
            loop {
                let state = self.state();
                if state.is_terminal() {
                    return state;
                }
                Timer::after(WAIT_POLL).await;
            }
        };

        match timeout {
            None => Ok(wait.await),
            Some(t) => with_timeout(t, wait)
                .await
                .map_err(|_| LinkError::WaitTimeout),
        }
    }

    /// CAS loop. `f` maps the current (state, retries) to a new word, or
    /// `None` to leave it untouched. Returns the new pair on a write, the
    /// current pair otherwise.
    fn update<F>(&self, f: F) -> Result<(LinkState, u8), (LinkState, u8)>
    where
        F: Fn(LinkState, u8) -> Option<u16>,
    {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (state, retries) = unpack(current);
            let Some(next) = f(state, retries) else {
                return Err((state, retries));
            };
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(unpack(next)),
                Err(actual) => current = actual,
            }
        }
    }
}
