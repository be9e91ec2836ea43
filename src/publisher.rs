//! HTTP publisher: turns a measured value into a sample and posts it.
//!
//! Publishing is opportunistic. When the link is not ready the call returns
//! straight away without touching the network, and nothing is ever retried.

use alloc::string::String;
use core::fmt::Write as FmtWrite;

use embassy_time::{with_timeout, Duration};
use heapless::String as HString;
use rand_core::RngCore;
use serde::Serialize;

use crate::config::TAG;
use crate::http::{is_success, Endpoint, HttpError, HttpTransport};
use crate::link::LinkSupervisor;

/// Bound on a whole exchange: connect, request, response.
pub const HTTP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lowest value [`draw_value`] produces.
pub const VALUE_MIN: u8 = 20;
/// Highest value [`draw_value`] produces.
pub const VALUE_MAX: u8 = 29;

/// JSON body sent to the collector. Field order is the wire order.
#[derive(Serialize, Debug)]
pub struct Sample<'a> {
    pub id: &'a str,
    pub value: u8,
    pub unit: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// `sensor_<n>`
pub fn sample_id(n: u32) -> HString<24> {
    let mut id = HString::new();
    // "sensor_" plus at most ten digits always fits.
    let _ = write!(id, "sensor_{}", n);
    id
}

pub fn encode_sample(n: u32, value: u8) -> Result<String, serde_json::Error> {
    let id = sample_id(n);
    serde_json::to_string(&Sample {
        id: &id,
        value,
        unit: "m",
        kind: "distance",
    })
}

/// Uniform-ish draw in `VALUE_MIN..=VALUE_MAX`.
pub fn draw_value<R: RngCore>(rng: &mut R) -> u8 {
    let span = (VALUE_MAX - VALUE_MIN + 1) as u32;
    VALUE_MIN + (rng.next_u32() % span) as u8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Link not ready; no I/O performed and no sample number consumed.
    Skipped,
    /// Collector answered 2xx.
    Delivered(u16),
    /// Collector answered with anything else.
    Rejected(u16),
    Failed(HttpError),
}

pub struct Publisher<'a, T> {
    link: &'a LinkSupervisor,
    transport: T,
    endpoint: Endpoint,
    next_sample: u32,
}

impl<'a, T: HttpTransport> Publisher<'a, T> {
    pub fn new(link: &'a LinkSupervisor, transport: T, endpoint: Endpoint) -> Self {
        Self {
            link,
            transport,
            endpoint,
            next_sample: 0,
        }
    }

    /// Number the next formatted sample will carry.
    pub fn next_sample(&self) -> u32 {
        self.next_sample
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn publish(&mut self, value: u8) -> PublishOutcome {
        if !self.link.is_ready() {
            log::warn!(target: TAG, "http: link not ready, skipping sample");
            return PublishOutcome::Skipped;
        }

        let n = self.next_sample;
        let body = match encode_sample(n, value) {
            Ok(body) => body,
            Err(e) => {
                log::error!(target: TAG, "http: cannot encode sample: {}", e);
                return PublishOutcome::Failed(HttpError::RequestTooLarge);
            }
        };
        self.next_sample = n.wrapping_add(1);

        log::info!(target: TAG, "http: POST {} {}", self.endpoint, body);

        let post = self.transport.post(&self.endpoint, &body);
        let result = match with_timeout(HTTP_TIMEOUT, post).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout),
        };

        match result {
            Ok(status) if is_success(status) => {
                log::info!(target: TAG, "http: sensor_{} delivered, status {}", n, status);
                PublishOutcome::Delivered(status)
            }
            Ok(status) => {
                log::warn!(target: TAG, "http: sensor_{} rejected, status {}", n, status);
                PublishOutcome::Rejected(status)
            }
            Err(e) => {
                log::error!(target: TAG, "http: sensor_{} not sent: {}", n, e);
                PublishOutcome::Failed(e)
            }
        }
    }
}
