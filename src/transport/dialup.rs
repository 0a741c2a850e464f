//! Dial-up modem transport over a serial port.
//!
//! The modem is driven with Hayes commands through the same echo-checked
//! exchange as glider commands. Dialling classifies a single attempt; retries
//! belong to [`crate::dial`].

use std::io::Write;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use super::patterns::{BUSY, CONNECT, DIAL_COMMAND, ESCAPE_SEQUENCE, HANG_UP_ATTEMPTS, NO_CARRIER};
use super::reader::LineReader;
use super::LineTransport;
use crate::channel::exchange;
use crate::config::LiveConfig;
use crate::dial::Dialer;
use crate::error::{CommandError, TransportError};

/// Poll interval of the serial reader thread.
const SERIAL_POLL: Duration = Duration::from_millis(100);

/// Result of one dial attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOutcome {
    Connected,
    Busy,
    NoCarrier,
    /// Anything else, including a missing echo or no answer at all.
    Other(String),
}

impl DialOutcome {
    /// Classify the modem's reply to a dial command.
    pub fn classify(response: &str) -> Self {
        if response.contains(CONNECT) {
            DialOutcome::Connected
        } else if response.contains(BUSY) {
            DialOutcome::Busy
        } else if response.contains(NO_CARRIER) {
            DialOutcome::NoCarrier
        } else {
            DialOutcome::Other(response.to_string())
        }
    }
}

/// Issue one dial command on any line transport and classify the reply.
///
/// Protocol-level failures (bad echo, silence) are reported as
/// [`DialOutcome::Other`]; only transport errors are `Err`.
pub fn dial_over<T: LineTransport + ?Sized>(
    transport: &mut T,
    number: &str,
    echo_timeout: Duration,
    connect_timeout: Duration,
) -> Result<DialOutcome, TransportError> {
    let command = format!("{} {}", DIAL_COMMAND, number);
    match exchange(transport, &command, echo_timeout, connect_timeout) {
        Ok(response) => Ok(DialOutcome::classify(&response)),
        Err(CommandError::Transport(e)) => Err(e),
        Err(e) => Ok(DialOutcome::Other(e.to_string())),
    }
}

/// Drop the carrier with the escape sequence.
///
/// The modem does not echo `+++`; the first line after it is discarded and the
/// second must read `NO CARRIER`. Tried up to [`HANG_UP_ATTEMPTS`] times.
pub fn hang_up_over<T: LineTransport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<bool, TransportError> {
    for attempt in 1..=HANG_UP_ATTEMPTS {
        transport.send(ESCAPE_SEQUENCE)?;
        let _ = transport.receive_line(timeout)?;
        let reply = transport.receive_line(timeout)?;
        if reply.as_deref().map(str::trim) == Some(NO_CARRIER) {
            debug!(attempt, "carrier dropped");
            return Ok(true);
        }
        debug!(attempt, ?reply, "hang-up not acknowledged");
    }
    Ok(false)
}

/// Hayes modem on a serial port.
pub struct DialupTransport {
    port: Box<dyn SerialPort>,
    lines: LineReader,
    port_name: String,
    echo_timeout: Duration,
    connect_timeout: Duration,
    hangup_timeout: Duration,
}

impl DialupTransport {
    /// Open and configure the serial port the modem is attached to.
    pub fn open(port_name: &str, config: &LiveConfig) -> Result<Self, TransportError> {
        let serial_err = |e: serialport::Error| TransportError::SerialPort {
            port: port_name.to_string(),
            message: e.to_string(),
        };

        let port = serialport::new(port_name, config.baud_rate)
            .timeout(SERIAL_POLL)
            .open()
            .map_err(serial_err)?;
        let read_half = port.try_clone().map_err(serial_err)?;
        let lines = LineReader::spawn(read_half, port_name);

        info!(port = port_name, baud = config.baud_rate, "serial port configured");
        Ok(Self {
            port,
            lines,
            port_name: port_name.to_string(),
            echo_timeout: config.echo_timeout,
            connect_timeout: config.connect_timeout,
            hangup_timeout: config.hangup_timeout,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// One dial attempt; see [`dial_over`].
    pub fn dial(&mut self, number: &str) -> Result<DialOutcome, TransportError> {
        let (echo, connect) = (self.echo_timeout, self.connect_timeout);
        dial_over(self, number, echo, connect)
    }

    /// Drop the line; see [`hang_up_over`].
    pub fn hang_up(&mut self) -> Result<bool, TransportError> {
        let timeout = self.hangup_timeout;
        hang_up_over(self, timeout)
    }
}

impl LineTransport for DialupTransport {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.reset();
        self.port.write_all(text.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        self.lines.recv(timeout)
    }

    fn reset(&mut self) {
        // The reader thread may still be holding bytes; the channel drain below
        // catches whatever it already forwarded.
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            debug!(port = %self.port_name, error = %e, "clearing input buffer failed");
        }
        self.lines.drain();
    }
}

impl Dialer for DialupTransport {
    fn dial(&mut self, number: &str) -> Result<DialOutcome, TransportError> {
        DialupTransport::dial(self, number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    const T: Duration = Duration::from_millis(10);

    #[test]
    fn classifies_modem_result_codes() {
        assert_eq!(DialOutcome::classify("CONNECT 2400/NONE"), DialOutcome::Connected);
        assert_eq!(DialOutcome::classify("BUSY"), DialOutcome::Busy);
        assert_eq!(DialOutcome::classify("NO CARRIER"), DialOutcome::NoCarrier);
        assert_eq!(
            DialOutcome::classify("NO DIALTONE"),
            DialOutcome::Other("NO DIALTONE".into())
        );
    }

    #[test]
    fn dial_sends_atd_with_number() {
        let mut mock = ScriptedTransport::new();
        mock.expect("atd 7818711051", &["atd 7818711051", "", "CONNECT 2400/NONE"]);

        let outcome = dial_over(&mut mock, "7818711051", T, T).unwrap();
        assert_eq!(outcome, DialOutcome::Connected);
        assert_eq!(mock.sent(), &["atd 7818711051\r".to_string()]);
    }

    #[test]
    fn dial_without_answer_is_other() {
        let mut mock = ScriptedTransport::new();
        mock.expect("atd 5551234", &["atd 5551234"]);
        assert!(matches!(
            dial_over(&mut mock, "5551234", T, T).unwrap(),
            DialOutcome::Other(_)
        ));
    }

    #[test]
    fn hang_up_checks_second_line() {
        let mut mock = ScriptedTransport::new();
        mock.expect("+++", &["", "OK"]);
        mock.expect("+++", &["", "NO CARRIER"]);

        assert!(hang_up_over(&mut mock, T).unwrap());
        assert_eq!(mock.sent().len(), 2);
    }

    #[test]
    fn hang_up_gives_up_after_bounded_attempts() {
        let mut mock = ScriptedTransport::new();
        assert!(!hang_up_over(&mut mock, T).unwrap());
        assert_eq!(mock.sent().len(), HANG_UP_ATTEMPTS as usize);
    }
}
