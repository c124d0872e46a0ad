// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{LcovParseError, LcovParseErrorKind};
use tracing::warn;

/// Line hits for one source file, as recorded in a single LCOV section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LcovSection {
    /// The `SF:` path, exactly as written in the report.
    pub source_file: String,
    /// The `DA:` records of the section, in report order.
    pub lines: Vec<LineHits>,
}

/// A single `DA:` record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineHits {
    /// The 1-based line number.
    pub line: u32,
    /// The number of times the line was executed.
    pub hits: u64,
}

/// Parses the line-coverage records of an LCOV report.
///
/// Only `SF:`, `DA:` and `end_of_record` are interpreted; all other records are skipped, as
/// are `DA:` records for line 0.
pub fn parse_lcov(input: &str) -> Result<Vec<LcovSection>, LcovParseError> {
    let mut sections = Vec::new();
    let mut current: Option<LcovSection> = None;

    for (index, line) in input.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();

        if let Some(source_file) = line.strip_prefix("SF:") {
            if let Some(open) = &current {
                return Err(LcovParseError::new(
                    line_number,
                    LcovParseErrorKind::NestedSection {
                        source_file: open.source_file.clone(),
                    },
                ));
            }
            current = Some(LcovSection {
                source_file: source_file.to_owned(),
                lines: Vec::new(),
            });
        } else if let Some(record) = line.strip_prefix("DA:") {
            let Some(section) = &mut current else {
                return Err(LcovParseError::new(
                    line_number,
                    LcovParseErrorKind::RecordOutsideSection {
                        record: line.to_owned(),
                    },
                ));
            };
            let hits = parse_line_record(record).ok_or_else(|| {
                LcovParseError::new(
                    line_number,
                    LcovParseErrorKind::InvalidLineRecord {
                        record: line.to_owned(),
                    },
                )
            })?;
            // Some generators attribute synthetic code to line 0.
            if hits.line == 0 {
                warn!(
                    "skipping coverage record for line 0 of `{}` (report line {line_number})",
                    section.source_file
                );
                continue;
            }
            section.lines.push(hits);
        } else if line == "end_of_record" {
            match current.take() {
                Some(section) => sections.push(section),
                None => {
                    return Err(LcovParseError::new(
                        line_number,
                        LcovParseErrorKind::RecordOutsideSection {
                            record: line.to_owned(),
                        },
                    ));
                }
            }
        }
    }

    match current {
        Some(section) => Err(LcovParseError::new(
            input.lines().count(),
            LcovParseErrorKind::UnterminatedSection {
                source_file: section.source_file,
            },
        )),
        None => Ok(sections),
    }
}

// DA:<line>,<hits>[,<checksum>]
fn parse_line_record(record: &str) -> Option<LineHits> {
    let mut parts = record.split(',');
    let line: u32 = parts.next()?.trim().parse().ok()?;
    let hits: u64 = parts.next()?.trim().parse().ok()?;
    Some(LineHits { line, hits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn parses_sections_and_ignores_other_records() {
        let input = indoc! {"
            TN:
            SF:src/a.ts
            FN:1,main
            FNDA:1,main
            DA:1,3
            DA:2,0,abcdef
            LF:2
            LH:1
            end_of_record
            SF:/abs/b.ts
            BRDA:4,0,0,1
            DA:4,1
            end_of_record
        "};

        let sections = parse_lcov(input).unwrap();
        assert_eq!(
            sections,
            vec![
                LcovSection {
                    source_file: "src/a.ts".to_owned(),
                    lines: vec![
                        LineHits { line: 1, hits: 3 },
                        LineHits { line: 2, hits: 0 },
                    ],
                },
                LcovSection {
                    source_file: "/abs/b.ts".to_owned(),
                    lines: vec![LineHits { line: 4, hits: 1 }],
                },
            ]
        );
    }

    #[test]
    fn line_zero_records_are_skipped() {
        let input = "SF:gen.ts\nDA:0,7\nDA:1,2\nend_of_record\n";
        assert_eq!(
            parse_lcov(input).unwrap(),
            vec![LcovSection {
                source_file: "gen.ts".to_owned(),
                lines: vec![LineHits { line: 1, hits: 2 }],
            }]
        );
    }

    #[test]
    fn empty_report_has_no_sections() {
        assert_eq!(parse_lcov("").unwrap(), vec![]);
    }

    #[test_case(
        "SF:a\nDA:x,1\nend_of_record\n",
        2,
        LcovParseErrorKind::InvalidLineRecord { record: "DA:x,1".to_owned() }
        ; "non-numeric line"
    )]
    #[test_case(
        "SF:a\nDA:3\nend_of_record\n",
        2,
        LcovParseErrorKind::InvalidLineRecord { record: "DA:3".to_owned() }
        ; "missing hits"
    )]
    #[test_case(
        "DA:1,1\n",
        1,
        LcovParseErrorKind::RecordOutsideSection { record: "DA:1,1".to_owned() }
        ; "line outside section"
    )]
    #[test_case(
        "end_of_record\n",
        1,
        LcovParseErrorKind::RecordOutsideSection { record: "end_of_record".to_owned() }
        ; "stray end of record"
    )]
    #[test_case(
        "SF:a\nSF:b\n",
        2,
        LcovParseErrorKind::NestedSection { source_file: "a".to_owned() }
        ; "nested section"
    )]
    #[test_case(
        "SF:a\nDA:1,1\n",
        2,
        LcovParseErrorKind::UnterminatedSection { source_file: "a".to_owned() }
        ; "unterminated section"
    )]
    fn malformed_reports(input: &str, line_number: usize, kind: LcovParseErrorKind) {
        let error = parse_lcov(input).unwrap_err();
        assert_eq!(error.line_number(), line_number);
        assert_eq!(error.kind(), &kind);
    }
}
