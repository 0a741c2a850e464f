//! Error types for the verification engine.
//!
//! Transport failures are the only errors that end a live session. Everything
//! a device can get wrong (bad echo, silence, missing or misordered fields) is
//! a verdict, not an error, and is modelled in [`crate::session`] and
//! [`crate::matcher`] instead.

use std::time::Duration;

/// Failure of the underlying byte channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The destination string could not be interpreted.
    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    /// A single connection attempt failed.
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The serial port could not be opened or configured.
    #[error("serial port {port}: {message}")]
    SerialPort { port: String, message: String },

    /// The reader side of the channel has gone away.
    #[error("transport disconnected")]
    Disconnected,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single echo-checked command exchange.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The device did not repeat the command verbatim; the channel is out of
    /// sync and no response line was read.
    #[error("echo mismatch: sent {sent:?}, echoed {echoed:?}")]
    EchoMismatch {
        sent: String,
        echoed: Option<String>,
    },

    /// No substantive response line arrived within the budget.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A command catalogue that cannot be used for matching.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("failed to parse catalogue: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("block '{0}' has an empty anchor")]
    EmptyAnchor(String),

    #[error("block '{0}' has no fields")]
    NoFields(String),

    #[error("block '{block}' field #{ordinal} has an empty token")]
    EmptyToken { block: String, ordinal: usize },

    #[error("block '{block}' lists token '{token}' twice")]
    DuplicateToken { block: String, token: String },

    #[error("block '{block}' must end with exactly one terminal field")]
    TerminalPlacement { block: String },

    #[error("duplicate block name '{0}'")]
    DuplicateBlock(String),
}
