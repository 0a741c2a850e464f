//! Echo-checked command exchange.
//!
//! The glider echoes every command it receives. A command is only trusted to
//! have reached the device if the echo matches what was sent; otherwise the
//! device state is unknown and the response is never read.
//!
//! # Exchange
//!
//! 1. send `command` followed by `\r`
//! 2. read one line within the echo timeout; it must equal `command`
//! 3. read lines until the first substantive one (continuation lines, i.e.
//!    empty or starting with `\r`, are skipped), bounded by a single deadline
//!    of `timeout` from the echo

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::CommandError;
use crate::transport::LineTransport;

/// How long the device gets to echo a command.
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(1);

/// Lines that precede the real response and carry no content.
pub fn is_continuation(line: &str) -> bool {
    line.is_empty() || line.starts_with('\r')
}

/// Run one echo-checked exchange on any transport.
///
/// Returns the first substantive response line, trimmed.
pub fn exchange<T: LineTransport + ?Sized>(
    transport: &mut T,
    command: &str,
    echo_timeout: Duration,
    timeout: Duration,
) -> Result<String, CommandError> {
    transport.send(&format!("{}\r", command))?;

    let echo = transport.receive_line(echo_timeout)?;
    match echo {
        Some(ref line) if line.trim() == command => {}
        _ => {
            warn!(command, echoed = ?echo, "echo mismatch");
            return Err(CommandError::EchoMismatch {
                sent: command.to_string(),
                echoed: echo,
            });
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match transport.receive_line(remaining)? {
            Some(line) if is_continuation(&line) => continue,
            Some(line) => {
                let response = line.trim().to_string();
                debug!(command, response = %response, "exchange complete");
                return Ok(response);
            }
            None => {
                debug!(command, ?timeout, "no response");
                return Err(CommandError::Timeout(timeout));
            }
        }
    }
}

/// A transport wrapped for echo-checked command/response use.
pub struct CommandChannel<T> {
    transport: T,
    echo_timeout: Duration,
}

impl<T: LineTransport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }

    pub fn with_echo_timeout(mut self, echo_timeout: Duration) -> Self {
        self.echo_timeout = echo_timeout;
        self
    }

    /// Send `command`, verify the echo, and return the response line.
    pub fn run(&mut self, command: &str, timeout: Duration) -> Result<String, CommandError> {
        exchange(&mut self.transport, command, self.echo_timeout, timeout)
    }

    pub fn echo_timeout(&self) -> Duration {
        self.echo_timeout
    }

    /// Direct access for exchanges that bypass the echo check.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}
