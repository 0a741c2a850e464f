//! Scripted session runner.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::script::{Script, Step, StepAction};
use crate::channel::CommandChannel;
use crate::config::LiveConfig;
use crate::error::CommandError;
use crate::transport::LineTransport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// A response arrived but lacked the expected text.
    Unexpected,
    TimedOut,
    EchoMismatch,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub command: String,
    pub expect: String,
    pub status: StepStatus,
    /// Response line, or the error text when there was none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    NoBranchMatched,
    EchoMismatch {
        command: String,
        echoed: Option<String>,
    },
    Step {
        branch: String,
        command: String,
        status: StepStatus,
    },
    Transport { message: String },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::NoBranchMatched => write!(f, "no branch entry matched"),
            SessionFailure::EchoMismatch { command, echoed } => match echoed {
                Some(e) => write!(f, "'{}' echoed as '{}'", command, e),
                None => write!(f, "'{}' was not echoed", command),
            },
            SessionFailure::Step {
                branch,
                command,
                status,
            } => write!(f, "{}: '{}' {:?}", branch, command, status),
            SessionFailure::Transport { message } => write!(f, "transport: {}", message),
        }
    }
}

/// Everything that happened during one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Branch that was selected, if any.
    pub branch: Option<String>,
    pub steps: Vec<StepOutcome>,
    pub failure: Option<SessionFailure>,
}

impl SessionReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.branch.is_some()
    }
}

/// Drives a [`Script`] over a command channel.
pub struct SessionRunner<T: LineTransport> {
    channel: CommandChannel<T>,
    default_timeout: Duration,
    settle: Duration,
    /// Set once the first step has been issued.
    started: bool,
}

impl<T: LineTransport> SessionRunner<T> {
    pub fn new(transport: T, config: &LiveConfig) -> Self {
        Self {
            channel: CommandChannel::new(transport).with_echo_timeout(config.echo_timeout),
            default_timeout: config.command_timeout,
            settle: config.settle,
            started: false,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.channel.into_inner()
    }

    /// Run the branch table. Device misbehaviour and transport failures both
    /// end up in the report; nothing here returns early with an error.
    pub fn run(&mut self, script: &Script) -> SessionReport {
        let mut report = SessionReport::default();

        let mut selected = None;
        for branch in &script.branches {
            let Some(entry) = branch.steps.first() else {
                continue;
            };
            let outcome = self.execute(entry);
            let status = outcome.status.clone();
            let detail = outcome.detail.clone();
            report.steps.push(outcome);

            match status {
                StepStatus::Passed => {
                    info!(branch = %branch.name, "branch selected");
                    selected = Some(branch);
                    break;
                }
                StepStatus::Unexpected | StepStatus::TimedOut => {
                    info!(branch = %branch.name, "entry step did not match");
                }
                StepStatus::EchoMismatch => {
                    report.failure = Some(SessionFailure::EchoMismatch {
                        command: entry.command.clone(),
                        echoed: detail,
                    });
                    return report;
                }
                StepStatus::Transport => {
                    report.failure = Some(SessionFailure::Transport {
                        message: detail.unwrap_or_default(),
                    });
                    return report;
                }
            }
        }

        let Some(branch) = selected else {
            warn!("no branch entry matched");
            report.failure = Some(SessionFailure::NoBranchMatched);
            return report;
        };
        report.branch = Some(branch.name.clone());

        for step in &branch.steps[1..] {
            let outcome = self.execute(step);
            let status = outcome.status.clone();
            let detail = outcome.detail.clone();
            report.steps.push(outcome);

            let failure = match status {
                StepStatus::Passed => continue,
                StepStatus::EchoMismatch => SessionFailure::EchoMismatch {
                    command: step.command.clone(),
                    echoed: detail,
                },
                StepStatus::Transport => SessionFailure::Transport {
                    message: detail.unwrap_or_default(),
                },
                status => SessionFailure::Step {
                    branch: branch.name.clone(),
                    command: step.command.clone(),
                    status,
                },
            };
            warn!(%failure, "session failed");
            report.failure = Some(failure);
            break;
        }
        report
    }

    fn execute(&mut self, step: &Step) -> StepOutcome {
        if self.started && !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        self.started = true;

        let timeout = step.timeout.unwrap_or(self.default_timeout);
        let (status, detail) = match step.action {
            StepAction::Command => self.command(step, timeout),
            StepAction::Wake => self.wake(step, timeout),
        };
        info!(command = %step.command, expect = %step.expect, ?status, "step");

        StepOutcome {
            command: step.command.clone(),
            expect: step.expect.clone(),
            status,
            detail,
        }
    }

    fn command(&mut self, step: &Step, timeout: Duration) -> (StepStatus, Option<String>) {
        match self.channel.run(&step.command, timeout) {
            Ok(response) if step.accepts(&response) => (StepStatus::Passed, Some(response)),
            Ok(response) => (StepStatus::Unexpected, Some(response)),
            Err(CommandError::Timeout(_)) if step.expect.is_empty() => (StepStatus::Passed, None),
            Err(CommandError::Timeout(_)) => (StepStatus::TimedOut, None),
            Err(CommandError::EchoMismatch { echoed, .. }) => (StepStatus::EchoMismatch, echoed),
            Err(CommandError::Transport(e)) => (StepStatus::Transport, Some(e.to_string())),
        }
    }

    fn wake(&mut self, step: &Step, timeout: Duration) -> (StepStatus, Option<String>) {
        let transport = self.channel.transport_mut();
        if let Err(e) = transport.send(&format!("{}\r", step.command)) {
            return (StepStatus::Transport, Some(e.to_string()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match transport.receive_line(remaining) {
                Ok(Some(line)) if step.accepts(&line) => {
                    return (StepStatus::Passed, Some(line.trim().to_string()))
                }
                Ok(Some(_)) => continue,
                Ok(None) if step.expect.is_empty() => return (StepStatus::Passed, None),
                Ok(None) => return (StepStatus::TimedOut, None),
                Err(e) => return (StepStatus::Transport, Some(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Branch;
    use crate::transport::ScriptedTransport;

    fn config() -> LiveConfig {
        LiveConfig {
            echo_timeout: Duration::from_millis(10),
            command_timeout: Duration::from_millis(10),
            settle: Duration::ZERO,
            ..LiveConfig::default()
        }
    }

    fn run(mock: ScriptedTransport, script: &Script) -> (SessionReport, ScriptedTransport) {
        let mut runner = SessionRunner::new(mock, &config());
        let report = runner.run(script);
        (report, runner.into_transport())
    }

    /// The glider answers every step of the default session up to `buoy_stop`.
    fn glider_up_to_buoy_stop(mock: &mut ScriptedTransport) {
        mock.expect("", &["", "root>"]);
        mock.expect("m_hello", &["m_hello", "root>"]);
        mock.expect("twreng", &["twreng", "Password:"]);
        mock.expect("pikabo", &[]);
        mock.expect("m_hello", &["m_hello", "", "eng>"]);
    }

    #[test]
    fn glider_session_runs_to_completion() {
        let mut mock = ScriptedTransport::new();
        glider_up_to_buoy_stop(&mut mock);
        mock.expect("buoy_stop", &["buoy_stop", "eng>"]);
        mock.expect("m_production", &["m_production", "eng>"]);
        mock.expect("m_state", &["m_state", "\r", "Mission State: PRODUCTION"]);
        mock.expect("sys_chat COM2 B9600", &["sys_chat COM2 B9600", "Connected!"]);
        mock.expect("id", &["?"]);
        mock.expect("id", &["id", "ice detect mode on"]);

        let (report, mock) = run(mock, &Script::glider().unwrap());
        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(report.branch.as_deref(), Some("prompt"));
        assert_eq!(report.steps.len(), 11);
        assert_eq!(mock.remaining_expectations(), 0);
        assert_eq!(mock.sent()[0], "\r");
    }

    #[test]
    fn engineering_prompt_enters_the_same_session() {
        let mut mock = ScriptedTransport::new();
        mock.expect("", &["", "eng>"]);
        mock.expect("m_hello", &["m_hello", "eng>"]);
        mock.expect("twreng", &["twreng", "eng>"]);

        let (report, _) = run(mock, &Script::glider().unwrap());
        assert_eq!(report.branch.as_deref(), Some("prompt"));
        assert_eq!(
            report.failure,
            Some(SessionFailure::Step {
                branch: "prompt".into(),
                command: "twreng".into(),
                status: StepStatus::Unexpected
            })
        );
    }

    #[test]
    fn echo_mismatch_mid_session_stops_sending() {
        let mut mock = ScriptedTransport::new();
        glider_up_to_buoy_stop(&mut mock);
        mock.expect("buoy_stop", &["buoy_sto", "eng>"]);
        mock.expect("m_production", &["m_production", "eng>"]);

        let (report, mock) = run(mock, &Script::glider().unwrap());
        assert_eq!(
            report.failure,
            Some(SessionFailure::EchoMismatch {
                command: "buoy_stop".into(),
                echoed: Some("buoy_sto".into())
            })
        );
        assert_eq!(report.steps.last().unwrap().status, StepStatus::EchoMismatch);
        // The response to buoy_stop was never read and m_production never sent.
        assert_eq!(mock.pending(), 1);
        assert_eq!(mock.sent().last().map(String::as_str), Some("buoy_stop\r"));
        assert_eq!(mock.sent().len(), 6);
        assert_eq!(mock.remaining_expectations(), 1);
    }

    #[test]
    fn passthrough_root_prompt_branch_runs_to_completion() {
        let mut mock = ScriptedTransport::new();
        mock.expect("m_hello", &["m_hello", "root>"]);
        mock.expect("twreng", &["twreng", "Password:"]);
        mock.expect("pikabo", &["pikabo"]);
        mock.expect("m_hello", &["m_hello", "", "eng>"]);
        mock.expect("buoy_stop", &["buoy_stop", "eng>"]);
        mock.expect("m_production", &["m_production", "eng>"]);
        mock.expect("m_state", &["m_state", "\r", "Mission State: PRODUCTION"]);

        let (report, mock) = run(mock, &Script::glider_passthrough().unwrap());
        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(report.branch.as_deref(), Some("root prompt"));
        assert_eq!(report.steps.len(), 7);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[test]
    fn engineering_prompt_falls_through_to_second_branch() {
        let mut mock = ScriptedTransport::new();
        mock.expect("m_hello", &["m_hello", "eng>"]);
        mock.expect("m_hello", &["m_hello", "eng>"]);
        mock.expect("buoy_stop", &["buoy_stop", "eng>"]);
        mock.expect("m_production", &["m_production", "eng>"]);
        mock.expect("m_state", &["m_state", "Mission State: PRODUCTION"]);
        mock.expect("sys_chat COM2 B9600", &["sys_chat COM2 B9600", "Connected!"]);
        mock.expect("", &["", "S>"]);
        mock.expect("id", &["id", "ice detect mode on"]);

        let (report, _) = run(mock, &Script::glider_passthrough().unwrap());
        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(report.branch.as_deref(), Some("engineering prompt"));
        assert_eq!(report.steps[0].status, StepStatus::Unexpected);
    }

    #[test]
    fn silent_device_reaches_sensor_branch() {
        let mut mock = ScriptedTransport::new();
        // m_hello twice without echo: the sensor does not speak the glider protocol.
        mock.expect("m_hello", &["m_hello"]);
        mock.expect("m_hello", &["m_hello"]);
        mock.expect("", &["", "S>"]);
        mock.expect("id", &["id", "ice detect mode on"]);

        let (report, _) = run(mock, &Script::glider_passthrough().unwrap());
        assert_eq!(report.branch.as_deref(), Some("sensor pass-through"));
        assert!(report.passed());
        assert_eq!(report.steps[0].status, StepStatus::TimedOut);
    }

    #[test]
    fn echo_mismatch_fails_session_without_reading_response() {
        let mut mock = ScriptedTransport::new();
        mock.expect("", &["m_hel", "root>"]);

        let (report, mock) = run(mock, &Script::glider().unwrap());
        assert!(!report.passed());
        assert_eq!(
            report.failure,
            Some(SessionFailure::EchoMismatch {
                command: "".into(),
                echoed: Some("m_hel".into())
            })
        );
        assert_eq!(report.steps.len(), 1);
        assert_eq!(mock.sent().len(), 1);
        assert_eq!(mock.pending(), 1);
    }

    #[test]
    fn failing_step_short_circuits() {
        let script = Script::new(vec![Branch::new(
            "only",
            vec![
                Step::command("m_hello", ">"),
                Step::command("m_state", "PRODUCTION"),
                Step::command("sys_chat COM2 B9600", "Connected!"),
            ],
        )])
        .unwrap();
        let mut mock = ScriptedTransport::new();
        mock.expect("m_hello", &["m_hello", "eng>"]);
        mock.expect("m_state", &["m_state", "Mission State: PRELUDE"]);

        let (report, mock) = run(mock, &script);
        assert_eq!(
            report.failure,
            Some(SessionFailure::Step {
                branch: "only".into(),
                command: "m_state".into(),
                status: StepStatus::Unexpected
            })
        );
        assert_eq!(report.steps[1].detail.as_deref(), Some("Mission State: PRELUDE"));
        assert_eq!(mock.sent().len(), 2);
    }

    #[test]
    fn no_matching_branch_fails() {
        let (report, _) = run(ScriptedTransport::new(), &Script::glider().unwrap());
        // Nothing echoes, so the very first entry step is an echo mismatch.
        assert!(matches!(
            report.failure,
            Some(SessionFailure::EchoMismatch { echoed: None, .. })
        ));

        let script = Script::new(vec![
            Branch::new("a", vec![Step::command("m_hello", "root>")]),
            Branch::new("b", vec![Step::wake("", "S>")]),
        ])
        .unwrap();
        let mut mock = ScriptedTransport::new();
        mock.expect("m_hello", &["m_hello", "eng>"]);
        let (report, _) = run(mock, &script);
        assert_eq!(report.failure, Some(SessionFailure::NoBranchMatched));
        assert_eq!(report.branch, None);
    }

    #[test]
    fn empty_expect_accepts_silence() {
        let script = Script::new(vec![Branch::new(
            "only",
            vec![Step::command("pikabo", ""), Step::wake("", "")],
        )])
        .unwrap();
        let mut mock = ScriptedTransport::new();
        mock.expect("pikabo", &["pikabo"]);

        let (report, _) = run(mock, &script);
        assert!(report.passed());
    }

    #[test]
    fn transport_loss_is_reported_not_raised() {
        let mut mock = ScriptedTransport::new();
        mock.disconnect();
        let (report, _) = run(mock, &Script::glider().unwrap());
        assert!(matches!(
            report.failure,
            Some(SessionFailure::Transport { .. })
        ));
    }
}
