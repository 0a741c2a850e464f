//! Ordered field matcher for transcript replay.
//!
//! A [`BlockMatcher`] follows one [`BlockSpec`] through a transcript. A line
//! containing the anchor opens a block; every later line is checked against
//! the block's fields until the terminal field commits a [`ReportRecord`].
//! The anchor or a closer seen before then fails the block as incomplete,
//! whatever else the line contains.
//!
//! Recognising a field:
//!
//! - its token occurs in the line
//! - it is not shadowed: no longer token of the block that contains it also
//!   occurs in the line
//! - if gated, the fields observed so far are exactly the canonical prefix
//!   before it
//!
//! Of the remaining candidates the longest token wins; equal lengths go to
//! the earlier field.

use tracing::{debug, trace};

use crate::catalogue::{BlockSpec, FieldSpec};
use crate::report::{ExtractedValue, FailureReason, ReportRecord};
use crate::sanitize::sanitize_line;

/// Progress through one open block.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub anchor_line: usize,
    /// Ordinals in the order their lines were seen.
    pub observed: Vec<usize>,
    pub values: Vec<ExtractedValue>,
    /// First line where `observed` stopped being a canonical prefix.
    pub divergence: Option<usize>,
    /// First failed `require` check.
    pub violation: Option<(usize, FailureReason)>,
}

impl MatchState {
    fn new(anchor_line: usize) -> Self {
        Self {
            anchor_line,
            observed: Vec::new(),
            values: Vec::new(),
            divergence: None,
            violation: None,
        }
    }

    fn is_canonical_prefix(&self, len: usize) -> bool {
        self.observed.len() == len && self.observed.iter().enumerate().all(|(i, &o)| i == o)
    }

    fn observe(&mut self, ordinal: usize, line_no: usize) {
        if self.divergence.is_none() && ordinal != self.observed.len() {
            self.divergence = Some(line_no);
        }
        self.observed.push(ordinal);
    }
}

pub struct BlockMatcher<'a> {
    block: &'a BlockSpec,
    open: Option<MatchState>,
    last_line: usize,
}

impl<'a> BlockMatcher<'a> {
    pub fn new(block: &'a BlockSpec) -> Self {
        Self {
            block,
            open: None,
            last_line: 0,
        }
    }

    pub fn block(&self) -> &BlockSpec {
        self.block
    }

    /// The block currently being matched, if any.
    pub fn state(&self) -> Option<&MatchState> {
        self.open.as_ref()
    }

    /// Process line `line_no` (1-based). Returns a record when a block closes.
    pub fn feed(&mut self, line_no: usize, raw: &str) -> Option<ReportRecord> {
        self.last_line = line_no;
        let line = sanitize_line(raw);

        let Some(mut state) = self.open.take() else {
            if line.contains(&self.block.anchor) {
                trace!(block = %self.block.name, line_no, "anchor");
                self.open = Some(MatchState::new(line_no));
            }
            return None;
        };

        let own_anchor = line.contains(&self.block.anchor);
        if own_anchor || self.block.closers.iter().any(|c| line.contains(c.as_str())) {
            let record = self.fail(state, line_no, FailureReason::Incomplete);
            if own_anchor {
                self.open = Some(MatchState::new(line_no));
            }
            return Some(record);
        }

        if let Some(field) = self.select(&state, &line) {
            state.observe(field.ordinal, line_no);
            let raw_value = value_token(&line, &field.token);

            if let Some(kind) = field.kind {
                let token = raw_value.unwrap_or("");
                match kind.parse(token) {
                    Some(value) => state.values.push(ExtractedValue {
                        field: field.token.clone(),
                        value,
                    }),
                    None => {
                        let reason = FailureReason::TypeParse {
                            field: field.token.clone(),
                            token: token.to_string(),
                        };
                        return Some(self.fail(state, line_no, reason));
                    }
                }
            }

            if let Some(expected) = &field.require {
                let actual = raw_value.unwrap_or("");
                if actual != expected && state.violation.is_none() {
                    debug!(block = %self.block.name, line_no, field = %field.token, actual, "require check failed");
                    state.violation = Some((
                        line_no,
                        FailureReason::SemanticCheck {
                            field: field.token.clone(),
                            expected: expected.clone(),
                            actual: actual.to_string(),
                        },
                    ));
                }
            }

            if field.terminal {
                return Some(self.commit(state, line_no));
            }
            self.open = Some(state);
            return None;
        }

        if self.block.strict && !line.trim().is_empty() {
            return Some(self.fail(state, line_no, FailureReason::UnexpectedLine));
        }

        self.open = Some(state);
        None
    }

    /// End of input: a block still open is incomplete.
    pub fn finish(&mut self) -> Option<ReportRecord> {
        let state = self.open.take()?;
        let line = self.last_line.max(state.anchor_line);
        Some(self.fail(state, line, FailureReason::Incomplete))
    }

    fn select(&self, state: &MatchState, line: &str) -> Option<&'a FieldSpec> {
        let block: &'a BlockSpec = self.block;
        let present: Vec<&'a FieldSpec> = block
            .fields
            .iter()
            .filter(|f| line.contains(f.token.as_str()))
            .collect();

        present
            .iter()
            .copied()
            .filter(|f| {
                !present
                    .iter()
                    .any(|g| g.token.len() > f.token.len() && g.token.contains(f.token.as_str()))
            })
            .filter(|f| !f.gated || state.is_canonical_prefix(f.ordinal))
            .max_by(|a, b| {
                a.token
                    .len()
                    .cmp(&b.token.len())
                    .then(b.ordinal.cmp(&a.ordinal))
            })
    }

    fn commit(&self, state: MatchState, line_no: usize) -> ReportRecord {
        let fields = &self.block.fields;

        if state.is_canonical_prefix(fields.len()) {
            return match state.violation {
                Some((line, reason)) => {
                    ReportRecord::fail(&self.block.name, state.anchor_line, line, reason, state.values)
                }
                None => {
                    debug!(block = %self.block.name, anchor = state.anchor_line, "pass");
                    ReportRecord::pass(&self.block.name, state.anchor_line, state.values)
                }
            };
        }

        let failure_line = state.divergence.unwrap_or(line_no);
        let missing = (0..fields.len()).find(|o| !state.observed.contains(o));
        let reason = match missing {
            Some(o) => FailureReason::MissingField {
                field: fields[o].token.clone(),
            },
            None => {
                let misplaced = state
                    .observed
                    .iter()
                    .enumerate()
                    .find(|&(i, &o)| i != o)
                    .map(|(_, &o)| o)
                    .unwrap_or(fields.len() - 1);
                FailureReason::OutOfOrder {
                    field: fields[misplaced].token.clone(),
                }
            }
        };
        debug!(block = %self.block.name, anchor = state.anchor_line, failure_line, %reason, "fail");
        ReportRecord::fail(
            &self.block.name,
            state.anchor_line,
            failure_line,
            reason,
            state.values,
        )
    }

    fn fail(&self, state: MatchState, line_no: usize, reason: FailureReason) -> ReportRecord {
        debug!(block = %self.block.name, anchor = state.anchor_line, line_no, %reason, "fail");
        ReportRecord::fail(
            &self.block.name,
            state.anchor_line,
            line_no,
            reason,
            state.values,
        )
    }
}

/// First whitespace-delimited word after `token` in `line`.
fn value_token<'l>(line: &'l str, token: &str) -> Option<&'l str> {
    let start = line.find(token)? + token.len();
    line[start..].split_whitespace().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, FieldValue};
    use crate::report::Verdict;

    const FIELDS: &str = r#"
        [[block]]
        name = "cmd X"
        anchor = "cmd X"
        [[block.field]]
        token = "FieldA"
        kind = "int"
        [[block.field]]
        token = "FieldB"
        kind = "real"
        [[block.field]]
        token = "FieldC"
        terminal = true
    "#;

    fn run(catalogue: &str, lines: &[&str]) -> Vec<ReportRecord> {
        let cat = Catalogue::from_toml_str(catalogue).unwrap();
        let mut matcher = BlockMatcher::new(&cat.blocks()[0]);
        let mut out: Vec<_> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| matcher.feed(i + 1, l))
            .collect();
        out.extend(matcher.finish());
        out
    }

    #[test]
    fn typed_fields_in_order_pass() {
        let records = run(FIELDS, &["cmd X", "FieldA 1", "FieldB 2.5", "FieldC done"]);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.verdict, Verdict::Pass);
        assert_eq!(r.anchor_line, 1);
        assert_eq!(r.value("FieldA"), Some(&FieldValue::Int(1)));
        assert_eq!(r.value("FieldB"), Some(&FieldValue::Real(2.5)));
    }

    #[test]
    fn noise_between_fields_is_ignored() {
        let records = run(
            FIELDS,
            &["boot banner", "cmd X", "FieldA 1", "", "telemetry 77", "FieldB 2.5", "FieldC"],
        );
        assert_eq!(records.len(), 1);
        assert!(records[0].passed());
        assert_eq!(records[0].anchor_line, 2);
    }

    #[test]
    fn permuted_field_fails_at_first_divergence() {
        let records = run(FIELDS, &["cmd X", "FieldB 2.5", "FieldA 1", "FieldC"]);
        let r = &records[0];
        assert_eq!(r.verdict, Verdict::Fail);
        assert_eq!(r.failure_line, Some(2));
        assert_eq!(
            r.reason,
            Some(FailureReason::OutOfOrder {
                field: "FieldB".into()
            })
        );
    }

    #[test]
    fn missing_field_is_named() {
        let records = run(FIELDS, &["cmd X", "FieldA 1", "FieldC"]);
        let r = &records[0];
        assert_eq!(r.failure_line, Some(3));
        assert_eq!(
            r.reason,
            Some(FailureReason::MissingField {
                field: "FieldB".into()
            })
        );
    }

    #[test]
    fn missing_terminal_commits_only_on_closure() {
        let cat = Catalogue::from_toml_str(FIELDS).unwrap();
        let mut m = BlockMatcher::new(&cat.blocks()[0]);
        assert!(m.feed(1, "cmd X").is_none());
        assert!(m.feed(2, "FieldA 1").is_none());
        assert!(m.feed(3, "FieldB 2.5").is_none());
        assert!(m.feed(4, "unrelated").is_none());

        let r = m.feed(5, "cmd X").unwrap();
        assert_eq!(r.failure_line, Some(5));
        assert_eq!(r.reason, Some(FailureReason::Incomplete));
        assert_eq!(r.anchor_line, 1);

        // The anchor reopened a block; end of input closes it.
        assert_eq!(m.state().unwrap().anchor_line, 5);
        let r = m.finish().unwrap();
        assert_eq!(r.anchor_line, 5);
        assert_eq!(r.reason, Some(FailureReason::Incomplete));
        assert!(m.finish().is_none());
    }

    #[test]
    fn closer_fails_open_block() {
        let cat = FIELDS.replace("anchor = \"cmd X\"", "anchor = \"cmd X\"\nclosers = [\"cmd Y\"]");
        let records = run(&cat, &["cmd X", "FieldA 1", "cmd Y", "FieldB 1.0", "FieldC"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_line, Some(3));
        assert_eq!(records[0].reason, Some(FailureReason::Incomplete));
    }

    #[test]
    fn unparseable_value_closes_immediately() {
        let records = run(FIELDS, &["cmd X", "FieldA one", "FieldB 2.5", "FieldC"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_line, Some(2));
        assert_eq!(
            records[0].reason,
            Some(FailureReason::TypeParse {
                field: "FieldA".into(),
                token: "one".into()
            })
        );
    }

    #[test]
    fn strict_block_rejects_unknown_lines_but_not_blanks() {
        let strict = FIELDS.replace("anchor = \"cmd X\"", "anchor = \"cmd X\"\nstrict = true");
        let records = run(&strict, &["cmd X", "FieldA 1", "", "FieldB 2.5", "FieldC"]);
        assert!(records[0].passed());

        let records = run(&strict, &["cmd X", "FieldA 1", "garbage", "FieldB 2.5", "FieldC"]);
        assert_eq!(records[0].failure_line, Some(3));
        assert_eq!(records[0].reason, Some(FailureReason::UnexpectedLine));
    }

    const SEABIRD: &str = r#"
        [[block]]
        name = "seabird"
        anchor = "root> ?"
        strict = true
        [[block.field]]
        token = "seabird_get_p"
        [[block.field]]
        token = "seabird_get_pt"
        [[block.field]]
        token = "seabird_get_pts"
        terminal = true
    "#;

    #[test]
    fn colliding_tokens_in_order_pass() {
        let records = run(
            SEABIRD,
            &["root> ?", "seabird_get_p  pressure", "seabird_get_pt  p and t", "seabird_get_pts  p, t and s"],
        );
        assert_eq!(records.len(), 1);
        assert!(records[0].passed());
    }

    #[test]
    fn longer_token_never_satisfies_shorter_field() {
        // Without the first entry, the `seabird_get_pt` line must not be taken
        // for `seabird_get_p`.
        let records = run(SEABIRD, &["root> ?", "seabird_get_pt", "seabird_get_pts"]);
        assert_eq!(records.len(), 1);
        assert!(!records[0].passed());
        assert_eq!(records[0].failure_line, Some(2));

        let lenient = SEABIRD.replace("strict = true", "");
        let records = run(&lenient, &["root> ?", "seabird_get_pt", "seabird_get_pts"]);
        assert_eq!(
            records[0].reason,
            Some(FailureReason::MissingField {
                field: "seabird_get_p".into()
            })
        );
    }

    #[test]
    fn gated_field_out_of_position_is_not_recognised() {
        let nudge = r#"
            [[block]]
            name = "mission_print"
            anchor = "> mission_print"
            [[block.field]]
            token = "AscentRate"
            kind = "real"
            [[block.field]]
            token = "BuoyancyNudge"
            kind = "int"
            [[block.field]]
            token = "ParkBuoyancyNudge"
            kind = "int"
            [[block.field]]
            token = "CheckSum"
            kind = "int"
            terminal = true
        "#;
        let records = run(
            nudge,
            &["> mission_print", "AscentRate 0.08", "BuoyancyNudge 25", "ParkBuoyancyNudge 5", "CheckSum 12345"],
        );
        assert!(records[0].passed());
        assert_eq!(records[0].value("ParkBuoyancyNudge"), Some(&FieldValue::Int(5)));

        // A stray BuoyancyNudge after the park nudge is ignored, not counted twice.
        let records = run(
            nudge,
            &["> mission_print", "AscentRate 0.08", "BuoyancyNudge 25", "ParkBuoyancyNudge 5", "BuoyancyNudge 9", "CheckSum 1"],
        );
        assert!(records[0].passed());
    }

    #[test]
    fn require_violation_is_reported_after_ordering() {
        let deploy = r#"
            [[block]]
            name = "m_deploy"
            anchor = "> m_deploy"
            [[block.field]]
            token = "Mission State:"
            kind = "text"
            require = "PRELUDE"
            [[block.field]]
            token = "Standby Mode:"
            kind = "text"
            require = "off"
            terminal = true
        "#;
        let records = run(
            deploy,
            &["root> m_deploy", "Mission State: PRODUCTION", "Standby Mode: on"],
        );
        let r = &records[0];
        assert_eq!(r.failure_line, Some(2));
        assert_eq!(
            r.reason,
            Some(FailureReason::SemanticCheck {
                field: "Mission State:".into(),
                expected: "PRELUDE".into(),
                actual: "PRODUCTION".into()
            })
        );

        let records = run(
            deploy,
            &["root> m_deploy", "Mission State: PRELUDE", "Standby Mode: off"],
        );
        assert!(records[0].passed());
    }

    #[test]
    fn ansi_codes_do_not_hide_tokens() {
        let records = run(
            FIELDS,
            &["\x1b[1mcmd X\x1b[0m", "\x1b[32mFieldA\x1b[0m 1", "FieldB 2.5", "FieldC\r"],
        );
        assert!(records[0].passed());
    }

    #[test]
    fn value_token_is_first_word_after_token() {
        assert_eq!(value_token("Mission State: PRELUDE now", "Mission State:"), Some("PRELUDE"));
        assert_eq!(value_token("  AscentRate   0.08", "AscentRate"), Some("0.08"));
        assert_eq!(value_token("FieldC", "FieldC"), None);
    }
}
