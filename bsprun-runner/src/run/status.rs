// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// The status of a node within a run.
///
/// Statuses are ranked in declaration order. A node's status only moves up in rank, so when
/// several results are reported for the same node the most severe one is kept.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RunStatus {
    /// Selected, but the run hasn't started.
    Pending,
    /// Waiting to be visited.
    Enqueued,
    /// Being run.
    Started,
    /// Passed.
    Passed,
    /// Failed.
    Failed,
    /// Not run, or ignored.
    Skipped,
    /// Couldn't be run, or was interrupted.
    Errored,
}

impl RunStatus {
    /// Returns true if the node still waits to be visited.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::Enqueued)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Enqueued => "enqueued",
            Self::Started => "started",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Counts of final node statuses, returned by [`TestRun::execute`](super::TestRun::execute).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Nodes that passed.
    pub passed: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes that errored.
    pub errored: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
    /// Nodes that were never reached.
    pub not_run: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    pub(crate) fn add(&mut self, status: RunStatus) {
        match status {
            RunStatus::Passed => self.passed += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Errored => self.errored += 1,
            RunStatus::Skipped => self.skipped += 1,
            RunStatus::Pending | RunStatus::Enqueued | RunStatus::Started => self.not_run += 1,
        }
    }

    /// Returns the total number of nodes in the run.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped + self.not_run
    }

    /// Returns true if nothing failed or errored and the run wasn't cancelled.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0 && !self.cancelled
    }
}
