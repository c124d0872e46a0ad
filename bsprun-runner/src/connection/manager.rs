// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::launcher::ServerLauncher;
use crate::{errors::ConnectionError, helpers::lock, rpc::RpcConnection};
use debug_ignore::DebugIgnore;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::debug;

type LaunchFuture = Shared<BoxFuture<'static, Result<RpcConnection, ConnectionError>>>;

/// Owns the single connection to the build server.
///
/// A connection is launched lazily by the first caller of [`Self::get_connection`]. Callers that
/// arrive while a launch is in flight wait for the same launch, so at most one server is
/// started per attempt. A failed launch is not retried automatically: the next caller starts a
/// new attempt.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    launcher: DebugIgnore<Arc<dyn ServerLauncher>>,
    cancel_grace_period: Duration,
    state: Mutex<ManagerState>,
}

#[derive(Debug)]
struct ManagerState {
    generation: u64,
    connection: ConnectionState,
}

#[derive(Debug)]
enum ConnectionState {
    NotStarted,
    InFlight {
        generation: u64,
        future: DebugIgnore<LaunchFuture>,
        previous: Option<RpcConnection>,
    },
    Ready(RpcConnection),
    Failed(ConnectionError),
    Disposed,
}

impl ConnectionManager {
    /// Creates a new manager. No server is started until a connection is requested.
    pub fn new(launcher: Arc<dyn ServerLauncher>, cancel_grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                launcher: DebugIgnore(launcher),
                cancel_grace_period,
                state: Mutex::new(ManagerState {
                    generation: 0,
                    connection: ConnectionState::NotStarted,
                }),
            }),
        }
    }

    /// Returns the current connection, launching the server if there isn't one.
    pub async fn get_connection(&self) -> Result<RpcConnection, ConnectionError> {
        let future = {
            let mut state = lock(&self.inner.state);
            match &state.connection {
                ConnectionState::Ready(connection) => return Ok(connection.clone()),
                ConnectionState::InFlight { future, .. } => future.0.clone(),
                ConnectionState::Disposed => return Err(ConnectionError::Disposed),
                ConnectionState::NotStarted | ConnectionState::Failed(_) => {
                    self.start_launch(&mut state, None)
                }
            }
        };
        future.await
    }

    /// Launches a new server, unless a launch is already in flight, in which case this waits
    /// for it.
    ///
    /// An existing connection stays in use until the new one is established, and is then
    /// closed. If the new launch fails, the existing connection is kept.
    pub async fn launch(&self) -> Result<RpcConnection, ConnectionError> {
        let future = {
            let mut state = lock(&self.inner.state);
            match &state.connection {
                ConnectionState::InFlight { future, .. } => future.0.clone(),
                ConnectionState::Disposed => return Err(ConnectionError::Disposed),
                ConnectionState::Ready(connection) => {
                    let previous = connection.clone();
                    self.start_launch(&mut state, Some(previous))
                }
                ConnectionState::NotStarted | ConnectionState::Failed(_) => {
                    self.start_launch(&mut state, None)
                }
            }
        };
        future.await
    }

    /// Returns the error from the last launch attempt, if it failed.
    pub fn last_error(&self) -> Option<ConnectionError> {
        match &lock(&self.inner.state).connection {
            ConnectionState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Closes the connection, waiting for an in-flight launch to finish first.
    ///
    /// After this, every request for a connection fails with [`ConnectionError::Disposed`].
    pub async fn dispose(&self) {
        let state = std::mem::replace(
            &mut lock(&self.inner.state).connection,
            ConnectionState::Disposed,
        );
        match state {
            ConnectionState::Ready(connection) => connection.close().await,
            ConnectionState::InFlight {
                future, previous, ..
            } => {
                if let Some(previous) = previous {
                    previous.close().await;
                }
                // The launch task closes its connection once it sees the disposed state.
                _ = future.0.await;
            }
            ConnectionState::NotStarted
            | ConnectionState::Failed(_)
            | ConnectionState::Disposed => {}
        }
    }

    fn start_launch(
        &self,
        state: &mut ManagerState,
        previous: Option<RpcConnection>,
    ) -> LaunchFuture {
        state.generation += 1;
        let generation = state.generation;
        debug!("launching build server (attempt {generation})");

        let inner = self.inner.clone();
        let launch = self.inner.launcher.launch();
        // The launch runs in its own task so that it settles even if every waiter goes away.
        let handle = tokio::spawn(async move {
            let result = launch
                .await
                .map(|channel| RpcConnection::new(channel, inner.cancel_grace_period));
            if let Some(stale) = inner.settle(generation, &result) {
                stale.close().await;
            }
            result
        });

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::LaunchAborted),
            }
        }
        .boxed()
        .shared();

        state.connection = ConnectionState::InFlight {
            generation,
            future: DebugIgnore(future.clone()),
            previous,
        };
        future
    }
}

impl ManagerInner {
    /// Records the outcome of a launch. Returns a connection that is no longer needed and must
    /// be closed.
    fn settle(
        &self,
        generation: u64,
        result: &Result<RpcConnection, ConnectionError>,
    ) -> Option<RpcConnection> {
        let mut state = lock(&self.state);
        let ConnectionState::InFlight {
            generation: current,
            previous,
            ..
        } = &mut state.connection
        else {
            debug!("launch {generation} finished after the manager was disposed");
            return result.as_ref().ok().cloned();
        };
        if *current != generation {
            return result.as_ref().ok().cloned();
        }

        let previous = previous.take();
        match result {
            Ok(connection) => {
                debug!("build server connection {generation} ready");
                state.connection = ConnectionState::Ready(connection.clone());
                previous
            }
            Err(error) => {
                debug!("build server launch {generation} failed: {error}");
                state.connection = match previous {
                    Some(previous) => ConnectionState::Ready(previous),
                    None => ConnectionState::Failed(error.clone()),
                };
                None
            }
        }
    }
}
