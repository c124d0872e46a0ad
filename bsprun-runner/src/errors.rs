// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by bsprun.

use camino::Utf8PathBuf;
use config::ConfigError;
use serde_json::Value;
use std::{fmt, io, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse bsprun config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while reading a single BSP connection file.
///
/// These errors are not fatal: the file is skipped and discovery continues.
#[derive(Debug, Error)]
#[error("failed to read BSP connection file `{path}`")]
pub struct ConnectionFileError {
    path: Utf8PathBuf,
    #[source]
    kind: ConnectionFileErrorKind,
}

impl ConnectionFileError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: ConnectionFileErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the path to the connection file.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// The kind of error that occurred while reading a connection file.
#[derive(Debug, Error)]
pub enum ConnectionFileErrorKind {
    /// The file could not be read.
    #[error("error reading file")]
    Read(#[source] io::Error),

    /// The file is not a valid connection file.
    #[error("error parsing file as JSON")]
    Parse(#[source] serde_json::Error),
}

/// An error that occurred while establishing the connection to the build server.
///
/// A launch attempt that fails with this error is not retried automatically. The next request
/// for a connection starts a new attempt.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// No connection file for the configured server was found.
    #[error("no BSP connection file for server `{server_name}` found in `{connection_dir}`")]
    ServerNotFound {
        /// The name of the server that was looked for.
        server_name: String,

        /// The directory that was searched.
        connection_dir: Utf8PathBuf,
    },

    /// The selected connection file has no command to run.
    #[error("BSP connection file `{path}` has an empty `argv`")]
    EmptyArgv {
        /// The connection file.
        path: Utf8PathBuf,
    },

    /// The server process could not be spawned.
    #[error("failed to spawn BSP server `{program}`")]
    Spawn {
        /// The program that was executed.
        program: String,

        /// The underlying error.
        #[source]
        error: Arc<io::Error>,
    },

    /// The server process was spawned without a piped stdio handle.
    #[error("BSP server `{program}` was spawned without a {stream} pipe")]
    MissingStdio {
        /// The program that was executed.
        program: String,

        /// The missing stream.
        stream: &'static str,
    },

    /// The initialize/initialized handshake failed.
    #[error("BSP initialize handshake failed")]
    Handshake {
        /// The underlying error.
        #[source]
        error: Arc<RequestError>,
    },

    /// The task launching the server ended without producing a result.
    #[error("BSP server launch was aborted")]
    LaunchAborted,

    /// The connection manager was disposed.
    #[error("connection manager has been disposed")]
    Disposed,
}

/// An error returned by a JSON-RPC request to the build server.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RequestError {
    /// The request was cancelled by the client.
    ///
    /// This is a benign outcome and is never reported as a failure.
    #[error("request `{method}` was cancelled")]
    Cancelled {
        /// The method that was cancelled.
        method: String,
    },

    /// The server returned an error response.
    #[error("request `{method}` failed with code {code}: {message}")]
    Server {
        /// The method that failed.
        method: String,

        /// The JSON-RPC error code.
        code: i64,

        /// The error message.
        message: String,

        /// Additional error data, if any.
        data: Option<Value>,
    },

    /// The request params could not be serialized.
    #[error("failed to encode params for `{method}`")]
    Encode {
        /// The method being called.
        method: String,

        /// The underlying error.
        #[source]
        error: Arc<serde_json::Error>,
    },

    /// The response could not be deserialized.
    #[error("failed to decode response to `{method}`")]
    Decode {
        /// The method being called.
        method: String,

        /// The underlying error.
        #[source]
        error: Arc<serde_json::Error>,
    },

    /// Writing the message to the server failed.
    #[error("failed to send `{method}` to the build server")]
    Write {
        /// The method being called.
        method: String,

        /// The underlying error.
        #[source]
        error: Arc<io::Error>,
    },

    /// The connection closed before the response arrived.
    #[error("connection to the build server closed before `{method}` completed")]
    ConnectionClosed {
        /// The method being called.
        method: String,
    },

    /// No connection to the build server is available.
    #[error("not connected to the build server")]
    NotConnected {
        /// The reason the connection is unavailable.
        #[source]
        error: ConnectionError,
    },
}

impl RequestError {
    /// Returns true if this error represents a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// An error that occurred while reading a framed message from the server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    /// Reading from the stream failed.
    #[error("error reading message from the build server")]
    Io(#[from] io::Error),

    /// A header line could not be parsed.
    #[error("invalid message header line `{line}`")]
    InvalidHeader {
        /// The offending line.
        line: String,
    },

    /// The message headers didn't include a `Content-Length`.
    #[error("message is missing a Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` header wasn't a valid length.
    #[error("invalid Content-Length `{value}`")]
    InvalidContentLength {
        /// The header value.
        value: String,
    },

    /// The `Content-Length` header exceeded the largest accepted message size.
    #[error("message of {length} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge {
        /// The declared length.
        length: usize,
        /// The maximum accepted length.
        max: usize,
    },

    /// The message body was not valid JSON-RPC.
    #[error("message body is not valid JSON-RPC")]
    Json(#[source] serde_json::Error),
}

/// An error that occurred while parsing an LCOV report.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("line {line_number}: {kind}")]
pub struct LcovParseError {
    line_number: usize,
    kind: LcovParseErrorKind,
}

impl LcovParseError {
    pub(crate) fn new(line_number: usize, kind: LcovParseErrorKind) -> Self {
        Self { line_number, kind }
    }

    /// Returns the 1-based line number in the report where the error occurred.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &LcovParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing an LCOV report.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum LcovParseErrorKind {
    /// A `DA:` record was not of the form `DA:<line>,<hits>[,<checksum>]`.
    InvalidLineRecord {
        /// The record.
        record: String,
    },

    /// A `DA:` or `end_of_record` appeared outside of an `SF:` section.
    RecordOutsideSection {
        /// The record.
        record: String,
    },

    /// An `SF:` section started before the previous one ended.
    NestedSection {
        /// The source file of the section that was still open.
        source_file: String,
    },

    /// The report ended inside an `SF:` section.
    UnterminatedSection {
        /// The source file of the section.
        source_file: String,
    },
}

impl fmt::Display for LcovParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLineRecord { record } => {
                write!(f, "invalid line record `{record}`")
            }
            Self::RecordOutsideSection { record } => {
                write!(f, "record `{record}` appears outside of a source file section")
            }
            Self::NestedSection { source_file } => {
                write!(
                    f,
                    "new source file section started before section for `{source_file}` ended"
                )
            }
            Self::UnterminatedSection { source_file } => {
                write!(f, "section for `{source_file}` is missing `end_of_record`")
            }
        }
    }
}

/// An error that occurred while ingesting a coverage report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoverageError {
    /// The report could not be read.
    #[error("failed to read coverage report `{path}`")]
    Read {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report could not be parsed.
    #[error("failed to parse coverage report `{path}`")]
    Parse {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: LcovParseError,
    },

    /// The coverage worker is no longer running.
    #[error("coverage worker has shut down")]
    WorkerGone,
}

/// An error returned while executing a test run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// [`TestRun::execute`](crate::run::TestRun::execute) was called more than once.
    #[error("test run `{origin_id}` has already been executed")]
    AlreadyExecuted {
        /// The origin ID of the run.
        origin_id: String,
    },
}

/// An error that occurs while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// Displays an error along with its chain of sources.
///
/// ```text
/// failed to read coverage report `/tmp/coverage.dat`
///   caused by:
///   - No such file or directory (os error 2)
/// ```
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(error) = source {
            write!(f, "\n  - {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_lists_sources() {
        let error = CoverageError::Read {
            path: "/tmp/coverage.dat".into(),
            error: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "failed to read coverage report `/tmp/coverage.dat`\n  caused by:\n  - not found"
        );
        assert_eq!(
            DisplayErrorChain::new(CoverageError::WorkerGone).to_string(),
            "coverage worker has shut down"
        );
    }
}
