//! TCP transport to a dockserver.

use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use super::reader::LineReader;
use super::LineTransport;
use crate::error::TransportError;

/// Read timeout of the socket reader thread, which doubles as its idle poll.
const SOCKET_POLL: Duration = Duration::from_millis(100);

pub struct SocketTransport {
    stream: Option<TcpStream>,
    lines: LineReader,
    address: String,
}

impl SocketTransport {
    /// Make a single connection attempt to `address` (`host:port`).
    ///
    /// Every resolved address is tried once within `timeout`; failure is
    /// reported as [`TransportError::Connect`].
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let connect_err = |source: std::io::Error| TransportError::Connect {
            address: address.to_string(),
            source,
        };

        let candidates: Vec<_> = address
            .to_socket_addrs()
            .map_err(connect_err)?
            .collect();
        if candidates.is_empty() {
            return Err(TransportError::InvalidDestination(address.to_string()));
        }

        let mut last_err = None;
        let mut stream = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(%candidate, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(connect_err(e)),
            (None, None) => return Err(TransportError::InvalidDestination(address.to_string())),
        };

        stream.set_read_timeout(Some(SOCKET_POLL))?;
        let lines = LineReader::spawn(stream.try_clone()?, address);

        info!(address, "connected");
        Ok(Self {
            stream: Some(stream),
            lines,
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Shut the connection down. Later sends fail with `Disconnected`.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(address = %self.address, "closed");
        }
    }
}

impl LineTransport for SocketTransport {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.reset();
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        stream.write_all(text.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::Disconnected);
        }
        self.lines.recv(timeout)
    }

    fn reset(&mut self) {
        self.lines.drain();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}
