// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{coverage::FileCoverage, tree::TestNode};

/// Receives the progress of a run.
///
/// Each status method is called when a node enters that status. Methods may be called from
/// the connection's reader task as well as the task driving the run, and must not block.
pub trait RunSink: Send + Sync {
    /// The node is waiting to be visited.
    fn enqueued(&self, node: &TestNode);

    /// The node is being run.
    fn started(&self, node: &TestNode);

    /// The node passed.
    fn passed(&self, node: &TestNode);

    /// The node failed, with an optional explanation.
    fn failed(&self, node: &TestNode, message: Option<&str>);

    /// The node couldn't be run or was interrupted, with an optional explanation.
    fn errored(&self, node: &TestNode, message: Option<&str>);

    /// The node was not run.
    fn skipped(&self, node: &TestNode);

    /// Appends text to the run's output. Line endings are `\r\n`.
    fn append_output(&self, text: &str);

    /// Coverage was recorded for a file.
    fn add_coverage(&self, coverage: &FileCoverage);

    /// The run is over. No further methods are called.
    fn end(&self);
}
