// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// Names of the JSON-RPC methods and notifications used by bsprun.
pub mod methods {
    /// `build/initialize` request.
    pub const INITIALIZE: &str = "build/initialize";
    /// `build/initialized` notification.
    pub const INITIALIZED: &str = "build/initialized";
    /// `build/shutdown` request.
    pub const SHUTDOWN: &str = "build/shutdown";
    /// `build/exit` notification.
    pub const EXIT: &str = "build/exit";
    /// `workspace/buildTargets` request.
    pub const WORKSPACE_BUILD_TARGETS: &str = "workspace/buildTargets";
    /// `buildTarget/sources` request.
    pub const BUILD_TARGET_SOURCES: &str = "buildTarget/sources";
    /// `buildTarget/test` request.
    pub const BUILD_TARGET_TEST: &str = "buildTarget/test";
    /// `build/showMessage` notification.
    pub const SHOW_MESSAGE: &str = "build/showMessage";
    /// `build/logMessage` notification.
    pub const LOG_MESSAGE: &str = "build/logMessage";
    /// `build/taskStart` notification.
    pub const TASK_START: &str = "build/taskStart";
    /// `build/taskProgress` notification.
    pub const TASK_PROGRESS: &str = "build/taskProgress";
    /// `build/taskFinish` notification.
    pub const TASK_FINISH: &str = "build/taskFinish";
    /// `build/publishDiagnostics` notification.
    pub const PUBLISH_DIAGNOSTICS: &str = "build/publishDiagnostics";
    /// `buildTarget/didChange` notification.
    pub const BUILD_TARGET_DID_CHANGE: &str = "buildTarget/didChange";
    /// `run/printStdout` notification.
    pub const RUN_PRINT_STDOUT: &str = "run/printStdout";
    /// `run/printStderr` notification.
    pub const RUN_PRINT_STDERR: &str = "run/printStderr";
    /// `$/cancelRequest` notification.
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
}

/// Values of the `dataKind` discriminator used by task notifications.
pub mod data_kind {
    /// `build/taskStart` data: a compile task.
    pub const COMPILE_TASK: &str = "compile-task";
    /// `build/taskStart` data: a single test has started.
    pub const TEST_START: &str = "test-start";
    /// `build/taskStart` data: tests for a build target have started.
    pub const TEST_TASK: &str = "test-task";
    /// `build/taskFinish` data: a compile report.
    pub const COMPILE_REPORT: &str = "compile-report";
    /// `build/taskFinish` data: a single test has finished.
    pub const TEST_FINISH: &str = "test-finish";
    /// `build/taskFinish` data: tests for a build target have finished.
    pub const TEST_REPORT: &str = "test-report";
    /// `TestFinish` data: JUnit-style test case details.
    pub const JUNIT_STYLE_TEST_CASE_DATA: &str = "junit-style-test-case-data";
}

/// JSON-RPC error codes with a meaning to bsprun.
pub mod error_codes {
    /// The method is not supported by the receiver.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Internal error. Bazel BSP returns this for requests interrupted by a cancellation.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The request was cancelled by the client.
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// Defines an integer-coded protocol enum that preserves unknown values.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        #[serde(from = "i64", into = "i64")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
            /// A value not known to this version of bsprun.
            Other(i64),
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                match value {
                    $( $value => Self::$variant, )*
                    other => Self::Other(other),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )*
                    $name::Other(other) => other,
                }
            }
        }
    };
}

int_enum! {
    /// Severity of a `build/showMessage` or `build/logMessage` notification.
    pub enum MessageType {
        /// An error message.
        Error = 1,
        /// A warning message.
        Warning = 2,
        /// An information message.
        Info = 3,
        /// A log message.
        Log = 4,
    }
}

int_enum! {
    /// Outcome of a task or request.
    pub enum StatusCode {
        /// Execution was successful.
        Ok = 1,
        /// Execution failed.
        Error = 2,
        /// Execution was cancelled.
        Cancelled = 3,
    }
}

int_enum! {
    /// Outcome of a single test, as reported in [`TestFinish`].
    pub enum TestStatus {
        /// The test passed.
        Passed = 1,
        /// The test failed.
        Failed = 2,
        /// The test was marked as ignored.
        Ignored = 3,
        /// The test execution was cancelled.
        Cancelled = 4,
        /// The test was not run.
        Skipped = 5,
    }
}

int_enum! {
    /// Whether a [`SourceItem`] is a file or a directory.
    pub enum SourceItemKind {
        /// A source file.
        File = 1,
        /// A directory of source files.
        Directory = 2,
    }
}

/// Identifies a build target by URI.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BuildTargetIdentifier {
    /// The target's URI, e.g. `@//pkg:target`.
    pub uri: String,
}

impl BuildTargetIdentifier {
    /// Creates a new identifier.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl fmt::Display for BuildTargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Params for `build/initialize`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBuildParams {
    /// Name of the client.
    pub display_name: String,
    /// Version of the client.
    pub version: String,
    /// The BSP version the client speaks.
    pub bsp_version: String,
    /// The workspace root, as a `file://` URI.
    pub root_uri: String,
    /// Capabilities of the client.
    pub capabilities: BuildClientCapabilities,
    /// Additional server-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Capabilities declared by the client during initialization.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildClientCapabilities {
    /// Languages the client supports.
    pub language_ids: Vec<String>,
}

/// Result of `build/initialize`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeBuildResult {
    /// Name of the server.
    #[serde(default)]
    pub display_name: String,
    /// Version of the server.
    #[serde(default)]
    pub version: String,
    /// The BSP version the server speaks.
    #[serde(default)]
    pub bsp_version: String,
    /// Capabilities of the server.
    #[serde(default)]
    pub capabilities: BuildServerCapabilities,
    /// Additional server-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Capabilities declared by the server during initialization.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildServerCapabilities {
    /// Languages the server can compile, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_provider: Option<LanguageProvider>,
    /// Languages the server can test, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_provider: Option<LanguageProvider>,
}

/// A set of languages supported for some server capability.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProvider {
    /// The supported languages.
    #[serde(default)]
    pub language_ids: Vec<String>,
}

/// Result of `workspace/buildTargets`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBuildTargetsResult {
    /// The build targets in this workspace.
    #[serde(default)]
    pub targets: Vec<BuildTarget>,
}

/// A build target, as reported by `workspace/buildTargets`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTarget {
    /// The target's identifier.
    pub id: BuildTargetIdentifier,
    /// A human readable name for this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The directory where this target belongs, as a URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
    /// Free-form tags, e.g. `test` or `library`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Languages of the target's sources.
    #[serde(default)]
    pub language_ids: Vec<String>,
    /// Direct dependencies of this target.
    #[serde(default)]
    pub dependencies: Vec<BuildTargetIdentifier>,
    /// What the server can do with this target.
    #[serde(default)]
    pub capabilities: BuildTargetCapabilities,
    /// Kind of `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Language-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BuildTarget {
    /// Returns the display name if present, otherwise the target URI.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id.uri)
    }
}

/// What a server can do with a build target.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTargetCapabilities {
    /// The target can be compiled.
    #[serde(default)]
    pub can_compile: bool,
    /// The target can be tested.
    #[serde(default)]
    pub can_test: bool,
    /// The target can be run.
    #[serde(default)]
    pub can_run: bool,
    /// The target can be debugged.
    #[serde(default)]
    pub can_debug: bool,
}

/// Params for `buildTarget/sources`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourcesParams {
    /// The targets to list sources for.
    pub targets: Vec<BuildTargetIdentifier>,
}

/// Result of `buildTarget/sources`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourcesResult {
    /// One entry per requested target.
    #[serde(default)]
    pub items: Vec<SourcesItem>,
}

/// The sources of one build target.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourcesItem {
    /// The target these sources belong to.
    pub target: BuildTargetIdentifier,
    /// The sources of the target.
    #[serde(default)]
    pub sources: Vec<SourceItem>,
    /// Source roots, as URIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<String>>,
}

/// A single source file or directory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    /// The URI of the source.
    pub uri: String,
    /// Whether the source is a file or a directory.
    pub kind: SourceItemKind,
    /// Whether the source is generated by the build.
    #[serde(default)]
    pub generated: bool,
}

/// Identifies a server-side task, with optional parents.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    /// The task's identifier.
    pub id: String,
    /// Identifiers of the parent tasks, nearest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl TaskId {
    /// Creates a new task identifier with no parents.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parents: Vec::new(),
        }
    }

    /// Creates a new task identifier with the given parents.
    pub fn with_parents(
        id: impl Into<String>,
        parents: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            parents: parents.into_iter().map(Into::into).collect(),
        }
    }
}

/// Params for `build/showMessage`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowMessageParams {
    /// The severity of the message.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// The task this message belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    /// The origin of the request that triggered this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// The message text.
    pub message: String,
}

/// Params for `build/logMessage`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessageParams {
    /// The severity of the message.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// The task this message belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    /// The origin of the request that triggered this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// The message text.
    pub message: String,
}

/// Params for `build/taskStart`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStartParams {
    /// The task that started.
    pub task_id: TaskId,
    /// The origin of the request that started this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    /// A message describing the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Kind of `data`, e.g. [`data_kind::TEST_TASK`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Task-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskStartParams {
    /// Decodes the [`TestTask`] payload, if this notification carries one.
    pub fn test_task(&self) -> Result<Option<TestTask>, serde_json::Error> {
        decode_data(&self.data_kind, &self.data, data_kind::TEST_TASK)
    }

    /// Decodes the [`TestStart`] payload, if this notification carries one.
    pub fn test_start(&self) -> Result<Option<TestStart>, serde_json::Error> {
        decode_data(&self.data_kind, &self.data, data_kind::TEST_START)
    }
}

/// Params for `build/taskProgress`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressParams {
    /// The task that made progress.
    pub task_id: TaskId,
    /// The origin of the request that started this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    /// A message describing the progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Total units of work, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    /// Units of work completed so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    /// Name of a unit of work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Kind of `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Task-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Params for `build/taskFinish`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFinishParams {
    /// The task that finished.
    pub task_id: TaskId,
    /// The origin of the request that started this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    /// A message describing the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The outcome of the task.
    pub status: StatusCode,
    /// Kind of `data`, e.g. [`data_kind::TEST_FINISH`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Task-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskFinishParams {
    /// Decodes the [`TestFinish`] payload, if this notification carries one.
    pub fn test_finish(&self) -> Result<Option<TestFinish>, serde_json::Error> {
        decode_data(&self.data_kind, &self.data, data_kind::TEST_FINISH)
    }

    /// Decodes the [`TestReport`] payload, if this notification carries one.
    pub fn test_report(&self) -> Result<Option<TestReport>, serde_json::Error> {
        decode_data(&self.data_kind, &self.data, data_kind::TEST_REPORT)
    }
}

/// `test-task` payload: tests for a build target started.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestTask {
    /// The target being tested.
    pub target: BuildTargetIdentifier,
}

/// `test-start` payload: a single test started.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStart {
    /// Name of the test.
    pub display_name: String,
    /// Source location of the test, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
}

/// `test-finish` payload: a single test finished.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFinish {
    /// Name of the test.
    pub display_name: String,
    /// Information about the test outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The outcome of the test.
    pub status: TestStatus,
    /// Source location of the test, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    /// Kind of `data`, e.g. [`data_kind::JUNIT_STYLE_TEST_CASE_DATA`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Additional details about the test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TestFinish {
    /// Decodes the JUnit-style test case details, if present.
    pub fn junit_data(&self) -> Result<Option<JUnitStyleTestCaseData>, serde_json::Error> {
        decode_data(
            &self.data_kind,
            &self.data,
            data_kind::JUNIT_STYLE_TEST_CASE_DATA,
        )
    }
}

/// JUnit-style details about a finished test case.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JUnitStyleTestCaseData {
    /// Time taken by the test, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// The class name of the test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// The package of the test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg: Option<String>,
    /// The full error output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_error: Option<String>,
    /// The type of the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// The short error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The error content, e.g. a stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_content: Option<String>,
}

/// `test-report` payload: tests for a build target finished.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    /// The origin of the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// The target that was tested.
    pub target: BuildTargetIdentifier,
    /// Number of tests that passed.
    #[serde(default)]
    pub passed: u64,
    /// Number of tests that failed.
    #[serde(default)]
    pub failed: u64,
    /// Number of tests that were ignored.
    #[serde(default)]
    pub ignored: u64,
    /// Number of tests that were cancelled.
    #[serde(default)]
    pub cancelled: u64,
    /// Number of tests that were skipped.
    #[serde(default)]
    pub skipped: u64,
    /// Total time taken, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

/// Params for `buildTarget/test`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestParams {
    /// The targets to test.
    pub targets: Vec<BuildTargetIdentifier>,
    /// Correlates notifications for this request back to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// Arguments passed to the test process.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Environment variables set for the test process.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Working directory for the test process.
    #[serde(default)]
    pub working_directory: String,
    /// Kind of `data`, e.g. [`bazel::BAZEL_TEST`](crate::bazel::BAZEL_TEST).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Server-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result of `buildTarget/test`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// The origin of the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// The overall outcome of the request.
    pub status_code: StatusCode,
    /// Kind of `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_kind: Option<String>,
    /// Server-specific result data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Params for `build/publishDiagnostics`.
///
/// bsprun only records that diagnostics arrived, so the diagnostics themselves are kept opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDiagnosticsParams {
    /// The document the diagnostics belong to.
    pub text_document: TextDocumentIdentifier,
    /// The build target the diagnostics belong to.
    pub build_target: BuildTargetIdentifier,
    /// The origin of the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// The diagnostics.
    #[serde(default)]
    pub diagnostics: Vec<Value>,
    /// Whether previous diagnostics for this document should be cleared.
    #[serde(default)]
    pub reset: bool,
}

/// A URI identifying a text document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    /// The document's URI.
    pub uri: String,
}

/// Params for `run/printStdout` and `run/printStderr`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintParams {
    /// The origin of the request.
    pub origin_id: String,
    /// The task this output belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    /// The output text.
    pub message: String,
}

/// Params for `$/cancelRequest`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CancelRequestParams {
    /// The id of the request to cancel.
    pub id: u64,
}

/// Decodes `data` as `T` if `actual_kind` matches `expected_kind`.
pub(crate) fn decode_data<T: DeserializeOwned>(
    actual_kind: &Option<String>,
    data: &Option<Value>,
    expected_kind: &str,
) -> Result<Option<T>, serde_json::Error> {
    match (actual_kind.as_deref(), data) {
        (Some(kind), Some(data)) if kind == expected_kind => {
            T::deserialize(data).map(Some)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!(1), MessageType::Error ; "error")]
    #[test_case(json!(4), MessageType::Log ; "log")]
    #[test_case(json!(17), MessageType::Other(17) ; "unknown value is preserved")]
    fn message_type_from_wire(input: Value, expected: MessageType) {
        let actual: MessageType = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(actual, expected);
        assert_eq!(serde_json::to_value(actual).unwrap(), input);
    }

    #[test]
    fn task_start_decodes_test_task() {
        let params: TaskStartParams = serde_json::from_value(json!({
            "taskId": {"id": "t2", "parents": ["t1"]},
            "originId": "origin",
            "dataKind": "test-task",
            "data": {"target": {"uri": "@//pkg:test"}},
        }))
        .unwrap();

        assert_eq!(params.task_id, TaskId::with_parents("t2", ["t1"]));
        assert_eq!(
            params.test_task().unwrap(),
            Some(TestTask {
                target: BuildTargetIdentifier::new("@//pkg:test"),
            })
        );
        assert_eq!(params.test_start().unwrap(), None);
    }

    #[test]
    fn task_finish_decodes_test_finish_with_junit_data() {
        let params: TaskFinishParams = serde_json::from_value(json!({
            "taskId": {"id": "t3"},
            "status": 2,
            "dataKind": "test-finish",
            "data": {
                "displayName": "testAdd",
                "status": 2,
                "dataKind": "junit-style-test-case-data",
                "data": {"className": "com.example.MathTest", "errorType": "AssertionError"},
            },
        }))
        .unwrap();

        assert_eq!(params.status, StatusCode::Error);
        let finish = params.test_finish().unwrap().expect("test-finish data present");
        assert_eq!(finish.display_name, "testAdd");
        assert_eq!(finish.status, TestStatus::Failed);
        let junit = finish.junit_data().unwrap().expect("junit data present");
        assert_eq!(junit.class_name.as_deref(), Some("com.example.MathTest"));
        assert_eq!(junit.error_type.as_deref(), Some("AssertionError"));
    }

    #[test]
    fn test_params_serialize_camel_case() {
        let params = TestParams {
            targets: vec![BuildTargetIdentifier::new("@//a:b")],
            origin_id: Some("o".to_owned()),
            arguments: Vec::new(),
            environment_variables: BTreeMap::new(),
            working_directory: String::new(),
            data_kind: None,
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "targets": [{"uri": "@//a:b"}],
                "originId": "o",
                "arguments": [],
                "environmentVariables": {},
                "workingDirectory": "",
            })
        );
    }

    #[test]
    fn build_target_defaults_missing_fields() {
        let target: BuildTarget =
            serde_json::from_value(json!({"id": {"uri": "@//x:y"}})).unwrap();
        assert_eq!(target.label(), "@//x:y");
        assert!(target.tags.is_empty());
        assert_eq!(target.capabilities, BuildTargetCapabilities::default());
    }
}
