// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::discovery::discover_server;
use crate::{config::BsprunConfig, errors::ConnectionError, rpc::ServerChannel};
use camino::Utf8PathBuf;
use futures::{FutureExt, future::BoxFuture};
use std::{process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
};
use tracing::{debug, info};

/// Starts a build server and returns the streams to talk to it.
pub trait ServerLauncher: Send + Sync + 'static {
    /// Starts a new server instance.
    fn launch(&self) -> BoxFuture<'static, Result<ServerChannel, ConnectionError>>;
}

/// Launches the build server as a subprocess, as described by its BSP connection file.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    workspace_root: Utf8PathBuf,
    connection_dir: Utf8PathBuf,
    server_name: String,
}

impl ProcessLauncher {
    /// Creates a launcher for the server configured in `config`.
    pub fn new(config: &BsprunConfig) -> Self {
        Self {
            workspace_root: config.workspace_root().to_owned(),
            connection_dir: config.connection_dir(),
            server_name: config.server_name().to_owned(),
        }
    }

    async fn spawn(self) -> Result<ServerChannel, ConnectionError> {
        let server = discover_server(&self.connection_dir, &self.server_name).await?;
        let (program, args) = server.command()?;
        info!(
            "starting {} {} (from `{}`)",
            server.details.name, server.details.version, server.path
        );

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| ConnectionError::Spawn {
                program: program.to_owned(),
                error: Arc::new(error),
            })?;
        debug!("build server running with pid {:?}", child.id());

        let missing = |stream| ConnectionError::MissingStdio {
            program: program.to_owned(),
            stream,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        Ok(ServerChannel::new(stdout, stdin).with_child(child))
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&self) -> BoxFuture<'static, Result<ServerChannel, ConnectionError>> {
        self.clone().spawn().boxed()
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!("[bsp server process] {line}"),
            Ok(None) => break,
            Err(error) => {
                debug!("error reading build server stderr: {error}");
                break;
            }
        }
    }
}
