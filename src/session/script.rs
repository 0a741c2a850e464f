//! Declarative session scripts.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const GLIDER_SCRIPT: &str = include_str!("../../scripts/glider.toml");
const PASSTHROUGH_SCRIPT: &str = include_str!("../../scripts/glider-passthrough.toml");

/// How a step talks to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    /// Echo-checked command; the first substantive response line is checked.
    #[default]
    Command,
    /// Raw send with no echo; every line until the timeout is checked.
    Wake,
}

#[derive(Debug, Deserialize)]
struct StepDef {
    command: String,
    #[serde(default)]
    expect: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    action: StepAction,
}

/// One command/expectation pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "StepDef")]
pub struct Step {
    pub command: String,
    /// Substring the response must contain. Empty accepts anything.
    pub expect: String,
    /// Response budget; the session default applies when unset.
    pub timeout: Option<Duration>,
    pub action: StepAction,
}

impl From<StepDef> for Step {
    fn from(def: StepDef) -> Self {
        Self {
            command: def.command,
            expect: def.expect,
            timeout: def.timeout_ms.map(Duration::from_millis),
            action: def.action,
        }
    }
}

impl Step {
    pub fn command(command: &str, expect: &str) -> Self {
        Self {
            command: command.to_string(),
            expect: expect.to_string(),
            timeout: None,
            action: StepAction::Command,
        }
    }

    pub fn wake(text: &str, expect: &str) -> Self {
        Self {
            action: StepAction::Wake,
            ..Self::command(text, expect)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn accepts(&self, response: &str) -> bool {
        response.contains(self.expect.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(rename = "step", default)]
    pub steps: Vec<Step>,
}

impl Branch {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps,
        }
    }
}

/// Branch table: the first branch whose entry step passes runs to the end.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(rename = "branch", default)]
    pub branches: Vec<Branch>,
}

impl Script {
    pub fn new(branches: Vec<Branch>) -> Result<Self> {
        let script = Self { branches };
        script.validate()?;
        Ok(script)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let script: Self = toml::from_str(text).context("Parsing session script")?;
        script.validate()?;
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Loading {}", path.display()))
    }

    /// The embedded APEX glider session.
    pub fn glider() -> Result<Self> {
        Self::from_toml_str(GLIDER_SCRIPT)
    }

    /// The embedded session that also reaches a CTD left in pass-through mode.
    pub fn glider_passthrough() -> Result<Self> {
        Self::from_toml_str(PASSTHROUGH_SCRIPT)
    }

    fn validate(&self) -> Result<()> {
        if self.branches.is_empty() {
            bail!("script has no branches");
        }
        for branch in &self.branches {
            if branch.steps.is_empty() {
                bail!("branch '{}' has no steps", branch.name);
            }
        }
        Ok(())
    }
}
