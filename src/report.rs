//! Per-block verdicts and the append-only report they are written to.
//!
//! The text format is one blank-line-separated entry per block:
//!
//! ```text
//! at line 12 m_state: SUCCESS
//!
//! at line 40 mission_print: FAILED (error in line 47: ParkPressure out of order)
//!
//! ```
//!
//! The JSON format writes one object per line instead.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::catalogue::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Why a block failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The block was cut short by the next command or the end of input.
    Incomplete,
    MissingField { field: String },
    OutOfOrder { field: String },
    TypeParse { field: String, token: String },
    SemanticCheck {
        field: String,
        expected: String,
        actual: String,
    },
    UnexpectedLine,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Incomplete => write!(f, "incomplete"),
            FailureReason::MissingField { field } => write!(f, "missing {}", field),
            FailureReason::OutOfOrder { field } => write!(f, "{} out of order", field),
            FailureReason::TypeParse { field, token } => {
                write!(f, "cannot parse {:?} for {}", token, field)
            }
            FailureReason::SemanticCheck {
                field,
                expected,
                actual,
            } => write!(f, "wrong {} expected {}, got {}", field, expected, actual),
            FailureReason::UnexpectedLine => write!(f, "unexpected line"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedValue {
    pub field: String,
    pub value: FieldValue,
}

/// Outcome of one verified block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub block: String,
    /// 1-based line of the anchor.
    pub anchor_line: usize,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub values: Vec<ExtractedValue>,
}

impl ReportRecord {
    pub fn pass(block: &str, anchor_line: usize, values: Vec<ExtractedValue>) -> Self {
        Self {
            block: block.to_string(),
            anchor_line,
            verdict: Verdict::Pass,
            failure_line: None,
            reason: None,
            values,
        }
    }

    pub fn fail(
        block: &str,
        anchor_line: usize,
        failure_line: usize,
        reason: FailureReason,
        values: Vec<ExtractedValue>,
    ) -> Self {
        Self {
            block: block.to_string(),
            anchor_line,
            verdict: Verdict::Fail,
            failure_line: Some(failure_line),
            reason: Some(reason),
            values,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.iter().find(|v| v.field == field).map(|v| &v.value)
    }
}

impl fmt::Display for ReportRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at line {} {}: ", self.anchor_line, self.block)?;
        match (&self.verdict, self.failure_line, &self.reason) {
            (Verdict::Pass, _, _) => write!(f, "SUCCESS"),
            (Verdict::Fail, Some(line), Some(reason)) => {
                write!(f, "FAILED (error in line {}: {})", line, reason)
            }
            (Verdict::Fail, Some(line), None) => write!(f, "FAILED (error in line {})", line),
            (Verdict::Fail, None, _) => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Render one record as a complete report entry, terminator included.
pub fn render(record: &ReportRecord, format: ReportFormat) -> io::Result<String> {
    match format {
        ReportFormat::Text => Ok(format!("{}\n\n", record)),
        ReportFormat::Json => {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');
            Ok(line)
        }
    }
}

/// Destination for committed records.
pub trait ReportSink {
    fn record(&mut self, record: &ReportRecord) -> io::Result<()>;
}

impl ReportSink for Vec<ReportRecord> {
    fn record(&mut self, record: &ReportRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes each record to a byte stream with a single write and flush.
pub struct StreamSink<W: Write> {
    out: W,
    format: ReportFormat,
    written: usize,
}

impl<W: Write> StreamSink<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl StreamSink<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn open_append(path: &Path, format: ReportFormat) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file, format))
    }
}

impl<W: Write> ReportSink for StreamSink<W> {
    fn record(&mut self, record: &ReportRecord) -> io::Result<()> {
        let entry = render(record, self.format)?;
        self.out.write_all(entry.as_bytes())?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Pass/fail counts over a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
}

impl Tally {
    pub fn of(records: &[ReportRecord]) -> Self {
        let passed = records.iter().filter(|r| r.passed()).count();
        Self {
            passed,
            failed: records.len() - passed,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}
