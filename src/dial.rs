//! Dial sequencer: bounded dial retries with per-cause counts.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::transport::DialOutcome;

/// Attempts made when the caller does not say otherwise.
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 5;

/// Anything that can place a single call.
pub trait Dialer {
    fn dial(&mut self, number: &str) -> Result<DialOutcome, TransportError>;
}

/// Outcome of a dial sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DialReport {
    pub attempts: u32,
    pub busy: u32,
    pub no_carrier: u32,
    pub other: u32,
    pub connected: bool,
}

impl DialReport {
    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} after {} attempt(s) (busy {}, no carrier {}, other {})",
            if self.connected { "connected" } else { "not connected" },
            self.attempts,
            self.busy,
            self.no_carrier,
            self.other
        )
    }
}

/// Dial `number` up to `max_attempts` times, stopping at the first connection.
///
/// Running out of attempts is reported as `connected == false`. Only
/// transport failures are errors.
pub fn dial_with_retries<D: Dialer + ?Sized>(
    dialer: &mut D,
    number: &str,
    max_attempts: u32,
) -> Result<DialReport, TransportError> {
    let mut report = DialReport::default();

    while report.attempts < max_attempts {
        report.attempts += 1;
        match dialer.dial(number)? {
            DialOutcome::Connected => {
                report.connected = true;
                info!(number, attempts = report.attempts, "connected");
                return Ok(report);
            }
            DialOutcome::Busy => report.busy += 1,
            DialOutcome::NoCarrier => report.no_carrier += 1,
            DialOutcome::Other(reply) => {
                warn!(number, attempt = report.attempts, reply = %reply, "unexpected dial reply");
                report.other += 1;
            }
        }
    }

    warn!(number, "{}", report.summary());
    Ok(report)
}
