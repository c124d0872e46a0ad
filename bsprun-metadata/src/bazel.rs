// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol extensions supported by Bazel BSP but not part of the base protocol.

use crate::{BuildTargetIdentifier, TaskId, protocol::decode_data};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `build/publishOutput` notification.
pub const PUBLISH_OUTPUT: &str = "build/publishOutput";

/// [`TestParams`](crate::TestParams) data kind for [`BazelTestParamsData`].
pub const BAZEL_TEST: &str = "bazel-test";

/// [`PublishOutputParams`] data kind for [`TestCoverageReport`].
pub const COVERAGE_REPORT: &str = "coverage-report";

/// Bazel-specific parameters for `buildTarget/test`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BazelTestParamsData {
    /// Whether to collect coverage for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<bool>,
    /// Restricts the run to tests matching this filter (passed as `--test_filter`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_filter: Option<String>,
    /// Additional flags passed to Bazel, separated by whitespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_bazel_params: Option<String>,
}

/// Params for `build/publishOutput`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutputParams {
    /// The origin of the request that produced this output.
    pub origin_id: String,
    /// The task that produced this output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// The build target that produced this output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_target: Option<BuildTargetIdentifier>,
    /// Kind of `data`, e.g. [`COVERAGE_REPORT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// The published output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PublishOutputParams {
    /// Decodes the [`TestCoverageReport`] payload, if this notification carries one.
    pub fn coverage_report(&self) -> Result<Option<TestCoverageReport>, serde_json::Error> {
        decode_data(&self.data_kind, &self.data, COVERAGE_REPORT)
    }
}

/// Location of an LCOV coverage report produced by a test run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCoverageReport {
    /// Path or `file://` URI of the LCOV report.
    pub lcov_report_uri: String,
}

/// Bazel-specific data in a [`TestResult`](crate::TestResult).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BazelTestResultData {
    /// Output collected from the test process, if the server collected it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_collector: Option<StdoutCollector>,
}

/// Collected process output.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StdoutCollector {
    /// The output, one entry per line.
    #[serde(default)]
    pub lines: Vec<String>,
}
