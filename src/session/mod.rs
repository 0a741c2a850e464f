//! Live session scripts and the runner that executes them.
//!
//! A [`Script`] is a shallow branch table. The glider can be found in
//! different states (root prompt, engineering prompt, sensor pass-through),
//! so each [`Branch`] starts with an entry step that identifies the state;
//! the first branch whose entry step passes is run to completion.

mod runner;
mod script;

pub use runner::{SessionFailure, SessionReport, SessionRunner, StepOutcome, StepStatus};
pub use script::{Branch, Script, Step, StepAction};
