//! Node configuration, embedded at compile time via environment variables.
//!
//! See `build.rs` for the variable names. Everything here is `const`-friendly
//! so the values end up in flash rather than being parsed at runtime.

/// Log target for every record this firmware emits.
pub const TAG: &str = "CAN_HTTP_NODE";

/// CAN identifier used when neither the build nor flash provides one.
pub const DEFAULT_NODE_ID: u32 = 0x101;

const DEFAULT_SERVER_IP: &str = "172.18.0.1";
const DEFAULT_SERVER_PORT: u16 = 3000;

/// Network and identity configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Identity forced at build time. `None` keeps whatever flash holds.
    pub node_id: Option<u32>,
    pub ssid: &'static str,
    pub password: &'static str,
    pub server_ip: &'static str,
    pub server_port: u16,
}

impl Config {
    /// Get the compile-time configuration.
    pub fn get() -> Self {
        Self {
            node_id: match option_env!("NODE_ID") {
                Some(s) => parse_node_id(s),
                None => None,
            },
            ssid: option_env!("WIFI_SSID").unwrap_or("unconfigured"),
            password: option_env!("WIFI_PASSWORD").unwrap_or(""),
            server_ip: option_env!("HTTP_SERVER_IP").unwrap_or(DEFAULT_SERVER_IP),
            server_port: match option_env!("HTTP_SERVER_PORT") {
                Some(s) => parse_port(s),
                None => DEFAULT_SERVER_PORT,
            },
        }
    }
}

/// Parse port at compile time (const fn compatible).
pub const fn parse_port(s: &str) -> u16 {
    let bytes = s.as_bytes();
    let mut result: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let digit = bytes[i];
        if digit >= b'0' && digit <= b'9' {
            result = result * 10 + (digit - b'0') as u32;
            if result > u16::MAX as u32 {
                return DEFAULT_SERVER_PORT;
            }
        }
        i += 1;
    }
    if result == 0 {
        DEFAULT_SERVER_PORT
    } else {
        result as u16
    }
}

/// Parse a CAN identifier written as `0x1A2` (hex) or `418` (decimal).
///
/// `_` separators are skipped. Returns `None` without at least one digit, for
/// stray characters, or for values that do not fit in a 29-bit identifier.
pub const fn parse_node_id(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    let hex = bytes.len() > 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X');
    let (start, radix) = if hex { (2, 16) } else { (0, 10) };

    let mut result: u32 = 0;
    let mut digits = 0;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i];
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as u32,
            b'a'..=b'f' if radix == 16 => (c - b'a' + 10) as u32,
            b'A'..=b'F' if radix == 16 => (c - b'A' + 10) as u32,
            b'_' => {
                i += 1;
                continue;
            }
            _ => return None,
        };
        result = match result.checked_mul(radix) {
            Some(v) => v,
            None => return None,
        };
        result = match result.checked_add(digit) {
            Some(v) => v,
            None => return None,
        };
        digits += 1;
        i += 1;
    }

    if digits == 0 || result > crate::can::MAX_EXTENDED_ID {
        None
    } else {
        Some(result)
    }
}
