// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints the progress of a run to a terminal.

use crate::output::ReporterStyles;
use bsprun_runner::{
    coverage::FileCoverage,
    helpers::plural,
    run::{RunSink, RunSummary},
    tree::{NodeType, TestNode},
};
use camino::{Utf8Path, Utf8PathBuf};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use swrite::{SWrite, swrite, swriteln};

/// Width of the status column.
const STATUS_WIDTH: usize = 12;

/// A [`RunSink`] that writes one line per status change.
///
/// Writes are serialized, so lines from the notification reader and the task driving the run
/// never interleave. The first write error is kept and all later output is dropped.
pub(crate) struct TerminalReporter {
    styles: ReporterStyles,
    verbose: bool,
    workspace_root: Utf8PathBuf,
    state: Mutex<ReporterState>,
}

struct ReporterState {
    writer: Box<dyn Write + Send>,
    error: Option<io::Error>,
}

impl TerminalReporter {
    pub(crate) fn new(
        writer: Box<dyn Write + Send>,
        styles: ReporterStyles,
        verbose: bool,
        workspace_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            styles,
            verbose,
            workspace_root: workspace_root.into(),
            state: Mutex::new(ReporterState {
                writer,
                error: None,
            }),
        }
    }

    /// Writes the final summary of a run.
    pub(crate) fn write_summary(&self, summary: &RunSummary, elapsed: Duration) {
        let mut out = String::new();
        swriteln!(out, "{}", "-".repeat(STATUS_WIDTH));

        let heading = if summary.cancelled {
            "Cancelled"
        } else {
            "Summary"
        };
        let heading_style = if summary.cancelled {
            self.styles.skip
        } else {
            self.styles.pass
        };
        let total = summary.total();
        swrite!(
            out,
            "{:>width$} [{:>8.3}s] {} {} run: ",
            heading.style(heading_style),
            elapsed.as_secs_f64(),
            total.style(self.styles.count),
            plural::tests_str(total),
            width = STATUS_WIDTH,
        );
        swrite!(
            out,
            "{} {}",
            summary.passed.style(self.styles.count),
            "passed".style(self.styles.pass),
        );
        for (count, word, style) in [
            (summary.failed, "failed", self.styles.fail),
            (summary.errored, "errored", self.styles.fail),
            (summary.skipped, "skipped", self.styles.skip),
            (summary.not_run, "not run", self.styles.skip),
        ] {
            if count > 0 {
                swrite!(out, ", {} {}", count.style(self.styles.count), word.style(style));
            }
        }
        out.push('\n');
        self.write(&out);
    }

    /// Returns the first error encountered while writing, if any.
    pub(crate) fn take_error(&self) -> Option<io::Error> {
        self.lock().error.take()
    }

    fn status_line(&self, status: &str, style: Style, node: &TestNode, message: Option<&str>) {
        let mut out = String::new();
        swriteln!(
            out,
            "{:>width$} {}",
            status.style(style),
            node.label().style(self.styles.label),
            width = STATUS_WIDTH,
        );
        if let Some(message) = message.filter(|message| !message.is_empty()) {
            write_indented(&mut out, message);
        }
        self.write(&out);
    }

    fn coverage_line(&self, path: &Utf8Path, covered_lines: usize, total_lines: usize) {
        let percent = if total_lines == 0 {
            0.0
        } else {
            100.0 * covered_lines as f64 / total_lines as f64
        };
        let mut out = String::new();
        swriteln!(
            out,
            "{:>width$} {} {covered_lines}/{total_lines} {} ({percent:.1}%)",
            "COVERAGE".style(self.styles.count),
            self.display_path(path),
            plural::lines_str(total_lines),
            width = STATUS_WIDTH,
        );
        self.write(&out);
    }

    fn write(&self, text: &str) {
        let mut state = self.lock();
        if state.error.is_some() {
            return;
        }
        let result = state
            .writer
            .write_all(text.as_bytes())
            .and_then(|()| state.writer.flush());
        if let Err(error) = result {
            state.error = Some(error);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn display_path<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.workspace_root).unwrap_or(path)
    }
}

impl RunSink for TerminalReporter {
    fn enqueued(&self, _node: &TestNode) {}

    fn started(&self, node: &TestNode) {
        if self.verbose || node.node_type() == Some(NodeType::Target) {
            self.status_line("START", self.styles.start, node, None);
        }
    }

    fn passed(&self, node: &TestNode) {
        self.status_line("PASS", self.styles.pass, node, None);
    }

    fn failed(&self, node: &TestNode, message: Option<&str>) {
        self.status_line("FAIL", self.styles.fail, node, message);
    }

    fn errored(&self, node: &TestNode, message: Option<&str>) {
        self.status_line("ERROR", self.styles.fail, node, message);
    }

    fn skipped(&self, node: &TestNode) {
        self.status_line("SKIP", self.styles.skip, node, None);
    }

    fn append_output(&self, text: &str) {
        self.write(&text.replace("\r\n", "\n"));
    }

    fn add_coverage(&self, coverage: &FileCoverage) {
        self.coverage_line(&coverage.path, coverage.covered_lines, coverage.total_lines);
    }

    fn end(&self) {}
}

/// Writes each line of `message` indented past the status column.
fn write_indented(out: &mut String, message: &str) {
    for line in message.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            swriteln!(out, "{:width$}{line}", "", width = STATUS_WIDTH + 1);
        }
    }
}
