//! Live-session configuration.
//!
//! Defaults match the glider's usual dial-up link. A TOML file may override
//! any subset of fields; the CLI then overrides the file.
//!
//! ```toml
//! modem_port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! connect_timeout_ms = 40000
//! settle_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the modem's serial port.
pub const MODEM_PORT_ENV: &str = "GLIDER_MODEM_PORT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Serial port the modem is attached to.
    pub modem_port: Option<String>,
    pub baud_rate: u32,
    /// Budget for the device to echo a command.
    #[serde(rename = "echo_timeout_ms", with = "millis")]
    pub echo_timeout: Duration,
    /// Response budget for steps that do not set their own.
    #[serde(rename = "command_timeout_ms", with = "millis")]
    pub command_timeout: Duration,
    /// How long a dial attempt may take to report `CONNECT`.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    #[serde(rename = "hangup_timeout_ms", with = "millis")]
    pub hangup_timeout: Duration,
    /// Pause between session steps.
    #[serde(rename = "settle_ms", with = "millis")]
    pub settle: Duration,
    pub dial_attempts: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            modem_port: None,
            baud_rate: 115_200,
            echo_timeout: crate::channel::DEFAULT_ECHO_TIMEOUT,
            command_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(40),
            hangup_timeout: Duration::from_secs(5),
            settle: Duration::from_secs(1),
            dial_attempts: crate::dial::DEFAULT_DIAL_ATTEMPTS,
        }
    }
}

impl LiveConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Parsing live configuration")
    }

    /// Load from a TOML file, then fill the modem port from the environment
    /// if the file did not name one.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Loading {}", path.display()))?;
        Ok(config.with_env())
    }

    /// Defaults plus environment.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    fn with_env(mut self) -> Self {
        if self.modem_port.is_none() {
            self.modem_port = std::env::var(MODEM_PORT_ENV).ok().filter(|p| !p.is_empty());
        }
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
