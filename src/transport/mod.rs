//! Line-oriented transports to the device.
//!
//! Every live session talks to the glider through a [`LineTransport`]: send a
//! line, receive a line with a timeout, clear pending input. Two concrete
//! variants exist:
//!
//! - [`DialupTransport`] - a Hayes-style modem on a serial port (adds `dial`
//!   and `hang_up`)
//! - [`SocketTransport`] - a TCP connection to a dockserver (adds `connect`
//!   and `close`)
//!
//! [`ScriptedTransport`] is an in-memory transport for deterministic tests.

mod dialup;
mod patterns;
mod reader;
mod scripted;
mod socket;

pub use dialup::{dial_over, hang_up_over, DialOutcome, DialupTransport};
pub use reader::{LineReader, LineSplitter};
pub use scripted::ScriptedTransport;
pub use socket::SocketTransport;

use crate::error::TransportError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Capability set shared by all transports.
pub trait LineTransport {
    /// Write `text` to the device.
    ///
    /// Any buffered input that has not been read yet is discarded first, so the
    /// next [`receive_line`](Self::receive_line) sees only what the device said
    /// after this send.
    fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next complete line.
    ///
    /// Returns `Ok(None)` when the device stayed silent, which is distinct from
    /// `Ok(Some(""))` (the device sent an empty line). Only I/O failures are
    /// errors.
    fn receive_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Discard all pending input.
    fn reset(&mut self);
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        (**self).send(text)
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        (**self).receive_line(timeout)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Where a live session should connect.
///
/// A destination containing `:` is a `host:port` pair for the network
/// transport, anything else is a number for the modem to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Dial(String),
    Socket { host: String, port: u16 },
}

impl Destination {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TransportError::InvalidDestination(text.to_string()));
        }

        let Some((host, port)) = text.rsplit_once(':') else {
            return Ok(Destination::Dial(text.to_string()));
        };

        let port: u16 = port
            .parse()
            .map_err(|_| TransportError::InvalidDestination(text.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::InvalidDestination(text.to_string()));
        }
        Ok(Destination::Socket {
            host: host.to_string(),
            port,
        })
    }

    pub fn is_dialup(&self) -> bool {
        matches!(self, Destination::Dial(_))
    }
}

impl FromStr for Destination {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Destination::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Dial(number) => write!(f, "{}", number),
            Destination::Socket { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}
