//! In-memory transport for deterministic tests.
//!
//! [`ScriptedTransport`] plays the device: each expectation pairs a command
//! line with the lines the device answers with (echo included). Expectations
//! are consumed in order; a send that does not match the next expectation gets
//! no answer at all, which looks like a silent device to the caller.
//!
//! ```
//! use glider_protocol_tests::transport::{LineTransport, ScriptedTransport};
//! use std::time::Duration;
//!
//! let mut mock = ScriptedTransport::new();
//! mock.expect("m_hello", &["m_hello", "root>"]);
//! mock.send("m_hello\r").unwrap();
//! let echo = mock.receive_line(Duration::ZERO).unwrap();
//! assert_eq!(echo.as_deref(), Some("m_hello"));
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use super::LineTransport;
use crate::error::TransportError;

#[derive(Debug, Clone)]
struct Expectation {
    command: String,
    replies: Vec<String>,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    expectations: VecDeque<Expectation>,
    pending: VecDeque<String>,
    sent: Vec<String>,
    resets: usize,
    connected: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            sent: Vec::new(),
            resets: 0,
            connected: true,
        }
    }

    /// When `command` is sent (line terminators ignored), answer with `replies`.
    pub fn expect(&mut self, command: &str, replies: &[&str]) {
        self.expectations.push_back(Expectation {
            command: command.to_string(),
            replies: replies.iter().map(|r| r.to_string()).collect(),
        });
    }

    /// Queue a line that arrives without being asked for.
    pub fn push_unsolicited(&mut self, line: &str) {
        self.pending.push_back(line.to_string());
    }

    /// Every `send` payload, verbatim.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Lines that have arrived but were not read yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Number of times pending input was discarded.
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Simulate a lost link: every later operation fails.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTransport for ScriptedTransport {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.reset();
        self.sent.push(text.to_string());

        let command = text.trim_end_matches(&['\r', '\n'][..]);
        let matches_next = self
            .expectations
            .front()
            .is_some_and(|e| e.command == command);
        if matches_next {
            if let Some(expectation) = self.expectations.pop_front() {
                self.pending.extend(expectation.replies);
            }
        }
        Ok(())
    }

    fn receive_line(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        Ok(self.pending.pop_front())
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.pending.clear();
    }
}
