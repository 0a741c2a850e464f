//! Transcript replay: run every catalogue block over a captured session.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalogue::Catalogue;
use crate::matcher::BlockMatcher;
use crate::report::{ReportRecord, ReportSink, Tally};

/// Feed `lines` to one matcher per block, writing records as they commit.
///
/// Each block is matched independently, so a line can advance several blocks
/// at once. Blocks still open at the end are reported as incomplete.
pub fn replay_lines<'l, I>(catalogue: &Catalogue, lines: I, sink: &mut dyn ReportSink) -> io::Result<Tally>
where
    I: IntoIterator<Item = &'l str>,
{
    let mut matchers: Vec<BlockMatcher<'_>> =
        catalogue.blocks().iter().map(BlockMatcher::new).collect();
    let mut tally = Tally::default();
    let mut emit = |record: ReportRecord, tally: &mut Tally| -> io::Result<()> {
        if record.passed() {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }
        sink.record(&record)
    };

    for (idx, line) in lines.into_iter().enumerate() {
        for matcher in matchers.iter_mut() {
            if let Some(record) = matcher.feed(idx + 1, line) {
                emit(record, &mut tally)?;
            }
        }
    }
    for matcher in matchers.iter_mut() {
        if let Some(record) = matcher.finish() {
            emit(record, &mut tally)?;
        }
    }
    Ok(tally)
}

/// Replay a transcript held in memory and collect the records.
pub fn replay_to_vec(catalogue: &Catalogue, transcript: &str) -> Vec<ReportRecord> {
    let mut records = Vec::new();
    // Collecting into a Vec cannot fail.
    let _ = replay_lines(catalogue, transcript.lines(), &mut records);
    records
}

/// Replay a transcript file. Bytes that are not UTF-8 are replaced.
pub fn replay_file(catalogue: &Catalogue, path: &Path, sink: &mut dyn ReportSink) -> Result<Tally> {
    let bytes = std::fs::read(path).with_context(|| format!("Reading {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let tally = replay_lines(catalogue, text.lines(), sink)
        .with_context(|| format!("Writing report for {}", path.display()))?;
    info!(
        transcript = %path.display(),
        passed = tally.passed,
        failed = tally.failed,
        "replay finished"
    );
    Ok(tally)
}
