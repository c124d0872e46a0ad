// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for bsprun.
//!
//! The default configuration is embedded in the binary. A repository can override it by
//! creating `.config/bsprun.toml` at the workspace root.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    helpers::resolve_path,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};
use tracing::warn;

/// Overrides applied on top of all config files, typically from the command line.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Overrides `server.name`.
    pub server_name: Option<String>,
}

/// bsprun configuration for a workspace.
#[derive(Clone, Debug)]
pub struct BsprunConfig {
    workspace_root: Utf8PathBuf,
    inner: BsprunConfigDeserialize,
}

impl BsprunConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/bsprun.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/bsprun.toml` in
    /// the workspace root.
    ///
    /// An explicitly specified file must exist. Unknown keys are reported as warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let mut builder = Self::make_default_config().add_source(source);
        if let Some(server_name) = &overrides.server_name {
            builder = builder
                .set_override("server.name", server_name.as_str())
                .map_err(|error| {
                    ConfigParseError::new(
                        &config_file,
                        ConfigParseErrorKind::BuildError(Box::new(error)),
                    )
                })?;
        }

        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown.iter().join(", "),
            );
        }

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the name of the server to launch.
    pub fn server_name(&self) -> &str {
        &self.inner.server.name
    }

    /// Returns the absolute path to the directory containing BSP connection files.
    pub fn connection_dir(&self) -> Utf8PathBuf {
        resolve_path(&self.workspace_root, self.inner.server.connection_dir.clone())
    }

    /// Returns the language IDs declared to the server.
    pub fn language_ids(&self) -> &[String] {
        &self.inner.server.language_ids
    }

    /// Returns how long to wait for the server to acknowledge a cancellation.
    pub fn cancel_grace_period(&self) -> Duration {
        self.inner.server.cancel_grace_period
    }

    /// Returns the settings applied to every test request.
    pub fn run(&self) -> &RunConfig {
        &self.inner.run
    }

    /// Returns the absolute coverage roots. An empty list means all files are included.
    pub fn coverage_roots(&self) -> Vec<Utf8PathBuf> {
        self.inner
            .coverage
            .roots
            .iter()
            .map(|root| resolve_path(&self.workspace_root, root.clone()))
            .collect()
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(BsprunConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: BsprunConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key; drop it so the path is only shown once.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Settings applied to every `buildTarget/test` request.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    arguments: Vec<String>,
    environment: BTreeMap<String, String>,
    working_directory: String,
    additional_params: Vec<String>,
    ide_client: String,
}

impl RunConfig {
    /// Arguments passed to the test process.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Environment variables set for the test process.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Working directory for the test process; empty if the server decides.
    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    /// Additional flags passed to Bazel.
    pub fn additional_params(&self) -> &[String] {
        &self.additional_params
    }

    /// The IDE client tag, if enabled.
    pub fn ide_client(&self) -> Option<&str> {
        Some(self.ide_client.as_str()).filter(|client| !client.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BsprunConfigDeserialize {
    server: ServerConfig,
    run: RunConfig,
    coverage: CoverageConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ServerConfig {
    name: String,
    connection_dir: Utf8PathBuf,
    language_ids: Vec<String>,
    #[serde(with = "humantime_serde")]
    cancel_grace_period: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CoverageConfig {
    roots: Vec<Utf8PathBuf>,
}
