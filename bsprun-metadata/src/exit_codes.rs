// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `bsprun` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum BsprunExitCode {}

impl BsprunExitCode {
    /// No errors occurred and bsprun exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a bsprun invocation: for example, the
    /// configuration could not be parsed.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed or errored.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The build server could not be discovered, spawned or initialized.
    pub const SERVER_CONNECTION_FAILED: i32 = 102;

    /// The run was cancelled by a signal before every test finished.
    pub const RUN_CANCELLED: i32 = 103;

    /// A request to the build server failed outside of a test run.
    pub const REQUEST_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
