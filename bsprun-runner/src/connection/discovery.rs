// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{
    ConnectionError, ConnectionFileError, ConnectionFileErrorKind, DisplayErrorChain,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, warn};

/// The contents of a BSP connection file (`.bsp/<name>.json`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BspConnectionDetails {
    /// The name of the server.
    pub name: String,
    /// The command used to start the server.
    pub argv: Vec<String>,
    /// The version of the server.
    pub version: String,
    /// The BSP version the server speaks.
    pub bsp_version: String,
    /// The languages the server supports.
    #[serde(default)]
    pub languages: Vec<String>,
}

/// A connection file selected by [`discover_server`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredServer {
    /// The path to the connection file.
    pub path: Utf8PathBuf,
    /// The parsed contents.
    pub details: BspConnectionDetails,
}

impl DiscoveredServer {
    /// Returns the program and arguments used to start the server.
    pub fn command(&self) -> Result<(&str, &[String]), ConnectionError> {
        match self.details.argv.split_first() {
            Some((program, args)) => Ok((program, args)),
            None => Err(ConnectionError::EmptyArgv {
                path: self.path.clone(),
            }),
        }
    }
}

/// Finds the connection file for `server_name` in `connection_dir`.
///
/// Files that can't be read or parsed are skipped with a warning. If several files name the
/// server, the one with the highest semver `version` wins; versions that don't parse as semver
/// rank below all others.
pub async fn discover_server(
    connection_dir: &Utf8Path,
    server_name: &str,
) -> Result<DiscoveredServer, ConnectionError> {
    let not_found = || ConnectionError::ServerNotFound {
        server_name: server_name.to_owned(),
        connection_dir: connection_dir.to_owned(),
    };

    let paths = match connection_files(connection_dir).await {
        Ok(paths) => paths,
        Err(error) => {
            debug!("unable to read BSP connection directory `{connection_dir}`: {error}");
            return Err(not_found());
        }
    };

    let mut candidates = Vec::new();
    for path in paths {
        match read_connection_file(&path).await {
            Ok(details) if details.name == server_name => {
                candidates.push(DiscoveredServer { path, details });
            }
            Ok(details) => {
                debug!("skipping connection file `{path}` for server `{}`", details.name);
            }
            Err(error) => warn!("{}", DisplayErrorChain::new(&error)),
        }
    }

    // `max_by_key` keeps the last of equal elements, and paths are sorted.
    candidates
        .into_iter()
        .max_by_key(|server| semver::Version::parse(&server.details.version).ok())
        .ok_or_else(not_found)
}

async fn connection_files(connection_dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut entries = tokio::fs::read_dir(connection_dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if path.extension() == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_connection_file(
    path: &Utf8Path,
) -> Result<BspConnectionDetails, ConnectionFileError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| ConnectionFileError::new(path, ConnectionFileErrorKind::Read(error)))?;
    serde_json::from_str(&contents)
        .map_err(|error| ConnectionFileError::new(path, ConnectionFileErrorKind::Parse(error)))
}
