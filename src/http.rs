//! Minimal HTTP/1.1 client pieces for posting samples to the collector.
//!
//! Request framing and response parsing live here so they can be checked on
//! the host. The socket side is behind [`HttpTransport`]; the firmware binds
//! it to an `embassy-net` TCP socket in `net.rs`.

use core::fmt::{self, Write as FmtWrite};
use core::future::Future;

use heapless::String as HString;

/// Collector resource every sample is posted to.
pub const API_PATH: &str = "/api/items";

/// Upper bound on a framed request (headers + body).
pub const MAX_REQUEST: usize = 512;

/// Collector address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: [u8; 4],
    pub port: u16,
}

impl Endpoint {
    /// `None` if `ip` is not a dotted IPv4 address.
    pub fn parse(ip: &str, port: u16) -> Option<Self> {
        Some(Self {
            ip: parse_ipv4(ip)?,
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.ip;
        write!(f, "http://{}.{}.{}.{}:{}{}", a, b, c, d, self.port, API_PATH)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpError {
    Connect,
    Write,
    Read,
    /// Whole exchange exceeded its deadline.
    Timeout,
    /// Response did not start with an HTTP status line.
    Malformed,
    RequestTooLarge,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Connect => write!(f, "connect failed"),
            HttpError::Write => write!(f, "write failed"),
            HttpError::Read => write!(f, "read failed"),
            HttpError::Timeout => write!(f, "timed out"),
            HttpError::Malformed => write!(f, "malformed response"),
            HttpError::RequestTooLarge => write!(f, "request too large"),
        }
    }
}

/// One-shot POST of a JSON body.
///
/// Each call opens its own connection and releases it before returning,
/// whatever the outcome. Returns the response status code.
pub trait HttpTransport {
    fn post<'a>(
        &'a mut self,
        endpoint: &'a Endpoint,
        body: &'a str,
    ) -> impl Future<Output = Result<u16, HttpError>> + 'a;
}

/// Frame a `POST /api/items` request carrying `body`.
pub fn write_request(endpoint: &Endpoint, body: &str) -> Result<HString<MAX_REQUEST>, HttpError> {
    let [a, b, c, d] = endpoint.ip;
    let mut request: HString<MAX_REQUEST> = HString::new();
    write!(
        request,
        "POST {} HTTP/1.1\r\n\
         Host: {}.{}.{}.{}:{}\r\n\
         Content-Type: application/json\r\n\
         Accept: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        API_PATH,
        a,
        b,
        c,
        d,
        endpoint.port,
        body.len()
    )
    .map_err(|_| HttpError::RequestTooLarge)?;
    request
        .push_str(body)
        .map_err(|_| HttpError::RequestTooLarge)?;
    Ok(request)
}

/// Length of the status line once its `\r\n` has arrived.
pub fn status_line_end(raw: &[u8]) -> Option<usize> {
    raw.windows(2).position(|w| w == b"\r\n")
}

/// Status code of a raw response, or [`HttpError::Malformed`].
pub fn parse_response(raw: &[u8]) -> Result<u16, HttpError> {
    // Only the status line matters; the body may be cut off or not UTF-8.
    let line_end = status_line_end(raw).unwrap_or(raw.len());
    let line = core::str::from_utf8(&raw[..line_end]).map_err(|_| HttpError::Malformed)?;
    if !line.starts_with("HTTP/") {
        return Err(HttpError::Malformed);
    }
    match parse_status_code(line) {
        0 => Err(HttpError::Malformed),
        status => Ok(status),
    }
}

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Parse HTTP status code from response.
pub fn parse_status_code(response: &str) -> u16 {
    // Format: "HTTP/1.1 200 OK\r\n..."
    response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// Parse IPv4 address string.
pub fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut octet_idx = 0;

    for part in s.split('.') {
        if octet_idx >= 4 {
            return None;
        }
        octets[octet_idx] = part.parse().ok()?;
        octet_idx += 1;
    }

    if octet_idx == 4 {
        Some(octets)
    } else {
        None
    }
}
