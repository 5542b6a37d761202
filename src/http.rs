//! Immutable HTTP message values flowing through addon dispatch.
//!
//! Every `with_*` method returns a new value and leaves its receiver untouched.
//! Unchanged parts (body bytes, header lists, attachments, the initiating request
//! of a response) are shared between the old and new value rather than copied.

mod headers;
mod request;
mod response;

use std::fmt;
use std::str::FromStr;

pub use headers::{Header, Headers};
pub use request::Request;
pub use response::Response;

/// The kind of traffic event being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A request on its way to the server
    Request,
    /// A response on its way back to the client
    Response,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Request => write!(f, "request"),
            EventKind::Response => write!(f, "response"),
        }
    }
}

/// The proxy tool a message originated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ToolSource {
    /// Live traffic passing through the intercepting proxy
    #[default]
    Proxy,
    /// Manually replayed traffic
    Repeater,
    /// Automated attack traffic
    Intruder,
    /// Scanner traffic
    Scanner,
    /// Traffic issued by another extension
    Extension,
    /// Any other tool, by name
    Other(String),
}

impl ToolSource {
    /// Returns the tool's name in lowercase.
    pub fn name(&self) -> &str {
        match self {
            ToolSource::Proxy => "proxy",
            ToolSource::Repeater => "repeater",
            ToolSource::Intruder => "intruder",
            ToolSource::Scanner => "scanner",
            ToolSource::Extension => "extension",
            ToolSource::Other(name) => name,
        }
    }

    /// Returns true for live proxy traffic.
    pub fn is_proxy(&self) -> bool {
        matches!(self, ToolSource::Proxy)
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ToolSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Ok(match lower.as_str() {
            "proxy" => ToolSource::Proxy,
            "repeater" => ToolSource::Repeater,
            "intruder" => ToolSource::Intruder,
            "scanner" => ToolSource::Scanner,
            "extension" | "extensions" => ToolSource::Extension,
            _ => ToolSource::Other(lower),
        })
    }
}

/// Decodes a `application/x-www-form-urlencoded` component.
///
/// Invalid escapes are kept verbatim; invalid UTF-8 is replaced.
pub(crate) fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                (Some(high), Some(low)) => {
                    out.push(high << 4 | low);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Percent-encodes a query component, leaving RFC 3986 unreserved characters alone.
pub(crate) fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Finds `name` in an `&`-separated list of `key=value` pairs, decoding both sides.
pub(crate) fn find_pair(pairs: &str, name: &str) -> Option<String> {
    pairs
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key) == name).then(|| url_decode(value))
        })
}
