//! Protocol verification for APEX-class gliders.
//!
//! Two ways to check that a glider implements its command line correctly:
//!
//! - live: dial or connect, then drive a scripted session ([`session`]) over
//!   an echo-checked command channel ([`channel`])
//! - replay: run a captured transcript through the ordered field matcher
//!   ([`matcher`]) against a command catalogue ([`catalogue`]) and append one
//!   record per response block to a report ([`report`])

pub mod catalogue;
pub mod channel;
pub mod config;
pub mod dial;
pub mod error;
pub mod matcher;
pub mod replay;
pub mod report;
pub mod sanitize;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use catalogue::{BlockSpec, Catalogue, FieldSpec, FieldValue, ValueKind};
pub use channel::CommandChannel;
pub use config::LiveConfig;
pub use dial::{dial_with_retries, DialReport, Dialer};
pub use error::{CatalogueError, CommandError, TransportError};
pub use matcher::{BlockMatcher, MatchState};
pub use replay::{replay_file, replay_lines, replay_to_vec};
pub use report::{FailureReason, ReportFormat, ReportRecord, ReportSink, StreamSink, Tally, Verdict};
pub use session::{Script, SessionReport, SessionRunner, Step};
pub use transport::{Destination, DialupTransport, LineTransport, ScriptedTransport, SocketTransport};
