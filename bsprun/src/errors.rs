// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use bsprun_metadata::BsprunExitCode;
use bsprun_runner::errors::*;
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders. Errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An error that bsprun expects to report to the user, as opposed to a bug.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 {
        #[source]
        err: camino::FromPathBufError,
    },
    #[error("workspace root is invalid")]
    WorkspaceRootInvalid { workspace_root: Utf8PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("failed to create tokio runtime")]
    TokioRuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to set up signal handler")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("failed to connect to the build server")]
    ServerConnectionFailed {
        #[from]
        err: ConnectionError,
    },
    #[error("build server request failed")]
    RequestFailed {
        #[from]
        err: RequestError,
    },
    #[error("no tests selected")]
    NoTestsSelected { patterns: Vec<String> },
    #[error("test run error")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("test run failed")]
    TestRunFailed,
    #[error("test run cancelled")]
    RunCancelled,
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::WorkspaceRootInvalid { .. }
            | Self::ConfigParseError { .. }
            | Self::TokioRuntimeCreateError { .. }
            | Self::SignalHandlerSetupError { .. }
            | Self::RunError { .. } => BsprunExitCode::SETUP_ERROR,
            Self::ServerConnectionFailed { .. } => BsprunExitCode::SERVER_CONNECTION_FAILED,
            Self::RequestFailed { err } => match err {
                // The request never reached the server.
                RequestError::NotConnected { .. } => BsprunExitCode::SERVER_CONNECTION_FAILED,
                _ => BsprunExitCode::REQUEST_FAILED,
            },
            Self::NoTestsSelected { .. } => BsprunExitCode::NO_TESTS_RUN,
            Self::TestRunFailed => BsprunExitCode::TEST_RUN_FAILED,
            Self::RunCancelled => BsprunExitCode::RUN_CANCELLED,
            Self::WriteOutputError { .. } => BsprunExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { err } => {
                error!("workspace root is not valid UTF-8");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalid { workspace_root } => {
                error!(
                    "workspace root `{}` is not a directory",
                    workspace_root.style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse bsprun config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::TokioRuntimeCreateError { err } => {
                error!("failed to create tokio runtime");
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                Some(err as &dyn Error)
            }
            Self::ServerConnectionFailed { err } => {
                error!("failed to connect to the build server");
                Some(err as &dyn Error)
            }
            Self::RequestFailed { err } => {
                error!("{err}");
                err.source()
            }
            Self::NoTestsSelected { patterns } => {
                if patterns.is_empty() {
                    error!("no test targets found");
                } else {
                    error!(
                        "no test targets match {}",
                        patterns
                            .iter()
                            .map(|pattern| format!("`{}`", pattern.style(styles.bold)))
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                None
            }
            Self::RunError { err } => {
                error!("{err}");
                err.source()
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::RunCancelled => {
                error!(
                    "{}",
                    "test run cancelled by signal".style(styles.warning_text)
                );
                None
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
