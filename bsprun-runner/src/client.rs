// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The BSP client: the initialize handshake, typed requests, and routing of server
//! notifications.
//!
//! Notifications carrying an origin ID are routed to the [`OriginHandler`]s registered for
//! that origin. Everything else goes to the [`ClientSink`] or is traced.

use crate::{
    cancel::CancelToken,
    config::BsprunConfig,
    connection::ConnectionManager,
    errors::{ConnectionError, DisplayErrorChain, RequestError},
    helpers::{lock, path_to_uri, strip_ansi},
    rpc::{Notification, NotificationHandler, RpcConnection},
};
use bsprun_metadata::{
    BuildClientCapabilities, BuildTargetIdentifier, InitializeBuildParams, InitializeBuildResult,
    LogMessageParams, MessageType, ShowMessageParams, SourcesParams, SourcesResult,
    TaskFinishParams, TaskProgressParams, TaskStartParams, TestParams, TestResult,
    WorkspaceBuildTargetsResult,
    bazel::{self, PublishOutputParams},
    methods,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, error, info, trace, warn};

/// The BSP version this client speaks.
pub const BSP_VERSION: &str = "2.2.0";

/// The name this client reports to the server.
pub const CLIENT_NAME: &str = "bsprun";

/// Receives notifications for a single origin ID.
///
/// Each method returns true if it consumed the notification. All methods default to ignoring
/// it, so a `build/logMessage` that no handler consumes still reaches the [`ClientSink`].
/// Handlers are called on the connection's reader task, in the order the server sent the
/// notifications, and must not block.
pub trait OriginHandler: Send + Sync {
    /// Called on `build/logMessage`.
    fn on_log_message(&self, _params: &LogMessageParams) -> bool {
        false
    }

    /// Called on `build/taskStart`.
    fn on_task_start(&self, _params: &TaskStartParams) -> bool {
        false
    }

    /// Called on `build/taskProgress`.
    fn on_task_progress(&self, _params: &TaskProgressParams) -> bool {
        false
    }

    /// Called on `build/taskFinish`.
    fn on_task_finish(&self, _params: &TaskFinishParams) -> bool {
        false
    }

    /// Called on `build/publishOutput`.
    fn on_publish_output(&self, _params: &PublishOutputParams) -> bool {
        false
    }
}

/// Displays messages from the server that aren't routed to a run.
pub trait ClientSink: Send + Sync {
    /// A message the user should see (`build/showMessage`).
    fn show_message(&self, message_type: MessageType, text: &str);

    /// A message for the client log (`build/logMessage`, or `build/showMessage` of type log).
    fn log_message(&self, message_type: MessageType, text: &str);
}

/// A [`ClientSink`] that writes everything to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingClientSink;

impl ClientSink for TracingClientSink {
    fn show_message(&self, message_type: MessageType, text: &str) {
        self.log_message(message_type, text);
    }

    fn log_message(&self, message_type: MessageType, text: &str) {
        match message_type {
            MessageType::Error => error!("{text}"),
            MessageType::Warning => warn!("{text}"),
            _ => info!("{text}"),
        }
    }
}

/// Values sent to the server in `build/initialize`.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    workspace_root: Utf8PathBuf,
    language_ids: Vec<String>,
}

impl ClientSettings {
    /// Creates new settings.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>, language_ids: Vec<String>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            language_ids,
        }
    }

    /// Reads settings from the config.
    pub fn from_config(config: &BsprunConfig) -> Self {
        Self::new(config.workspace_root(), config.language_ids().to_vec())
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    fn initialize_params(&self) -> InitializeBuildParams {
        InitializeBuildParams {
            display_name: CLIENT_NAME.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            bsp_version: BSP_VERSION.to_owned(),
            root_uri: path_to_uri(&self.workspace_root),
            capabilities: BuildClientCapabilities {
                language_ids: self.language_ids.clone(),
            },
            data: Some(json!({
                "featureFlags": {
                    "isPythonSupportEnabled": true,
                },
            })),
        }
    }
}

/// A connection that completed the initialize handshake.
#[derive(Clone, Debug)]
struct ReadyState {
    connection: RpcConnection,
    result: Arc<InitializeBuildResult>,
}

type ReadyFuture = Shared<BoxFuture<'static, Result<ReadyState, ConnectionError>>>;

/// A BSP client.
///
/// Cloning is cheap; all clones share the same connection and handler registry.
#[derive(Clone, Debug)]
pub struct BspClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    connections: ConnectionManager,
    settings: ClientSettings,
    sink: DebugIgnore<Arc<dyn ClientSink>>,
    origins: Arc<OriginRegistry>,
    ready: Mutex<Option<DebugIgnore<ReadyFuture>>>,
}

impl BspClient {
    /// Creates a new client. The handshake is performed on first use.
    pub fn new(
        connections: ConnectionManager,
        settings: ClientSettings,
        sink: Arc<dyn ClientSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connections,
                settings,
                sink: DebugIgnore(sink),
                origins: Arc::new(OriginRegistry::default()),
                ready: Mutex::new(None),
            }),
        }
    }

    /// Returns the connection manager.
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Returns the settings sent to the server.
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Waits for the initialize handshake to complete, starting it if necessary, and returns
    /// the initialized connection.
    ///
    /// Concurrent callers share one handshake. A failed handshake is reported to every waiter;
    /// the next call starts a new attempt.
    pub async fn ready(&self) -> Result<RpcConnection, ConnectionError> {
        Ok(self.ready_future().await?.connection)
    }

    /// Returns the server's answer to `build/initialize`.
    pub async fn initialize_result(
        &self,
    ) -> Result<Arc<InitializeBuildResult>, ConnectionError> {
        Ok(self.ready_future().await?.result)
    }

    fn ready_future(&self) -> ReadyFuture {
        let mut ready = lock(&self.inner.ready);
        if let Some(future) = &*ready {
            let reusable = match future.0.peek() {
                None => true,
                Some(Ok(state)) => !state.connection.is_closed(),
                Some(Err(_)) => false,
            };
            if reusable {
                return future.0.clone();
            }
        }

        let inner = self.inner.clone();
        let future = async move {
            let result = handshake(&inner).await;
            if let Err(error) = &result {
                inner.sink.show_message(
                    MessageType::Error,
                    &format!(
                        "failed to connect to the build server: {}",
                        DisplayErrorChain::new(error)
                    ),
                );
            }
            result
        }
        .boxed()
        .shared();
        *ready = Some(DebugIgnore(future.clone()));
        future
    }

    /// Routes notifications for `origin_id` to `handler` until the returned registration is
    /// dropped.
    ///
    /// Several handlers may be registered for the same origin; each receives every
    /// notification.
    pub fn register_origin(
        &self,
        origin_id: impl Into<String>,
        handler: Arc<dyn OriginHandler>,
    ) -> OriginRegistration {
        self.inner.origins.register(origin_id.into(), handler)
    }

    /// Sends `workspace/buildTargets`.
    pub async fn workspace_build_targets(
        &self,
    ) -> Result<WorkspaceBuildTargetsResult, RequestError> {
        self.request(methods::WORKSPACE_BUILD_TARGETS, &(), &CancelToken::never())
            .await
    }

    /// Sends `buildTarget/sources`.
    pub async fn build_target_sources(
        &self,
        targets: Vec<BuildTargetIdentifier>,
    ) -> Result<SourcesResult, RequestError> {
        self.request(
            methods::BUILD_TARGET_SOURCES,
            &SourcesParams { targets },
            &CancelToken::never(),
        )
        .await
    }

    /// Sends `buildTarget/test`. If `cancel` fires, the cancellation is forwarded to the server.
    pub async fn build_target_test(
        &self,
        params: &TestParams,
        cancel: &CancelToken,
    ) -> Result<TestResult, RequestError> {
        self.request(methods::BUILD_TARGET_TEST, params, cancel).await
    }

    /// Shuts the server down gracefully (`build/shutdown`, then `build/exit`) if a handshake
    /// succeeded, then disposes of the connection.
    pub async fn shutdown(&self) {
        let ready = lock(&self.inner.ready).take();
        let connection = ready.and_then(|future| match future.0.peek() {
            Some(Ok(state)) => Some(state.connection.clone()),
            _ => None,
        });

        if let Some(connection) = connection.filter(|connection| !connection.is_closed()) {
            debug!("shutting down build server");
            let shutdown = connection
                .request::<_, serde_json::Value>(methods::SHUTDOWN, &(), &CancelToken::never())
                .await;
            if let Err(error) = shutdown {
                debug!("build/shutdown failed: {}", DisplayErrorChain::new(&error));
            }
            if let Err(error) = connection.notify(methods::EXIT, &()).await {
                debug!("build/exit failed: {}", DisplayErrorChain::new(&error));
            }
        }

        self.inner.connections.dispose().await;
    }

    async fn request<P, R>(
        &self,
        method: &str,
        params: &P,
        cancel: &CancelToken,
    ) -> Result<R, RequestError>
    where
        P: serde::Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let connection = self
            .ready()
            .await
            .map_err(|error| RequestError::NotConnected { error })?;
        connection.request(method, params, cancel).await
    }
}

async fn handshake(inner: &ClientInner) -> Result<ReadyState, ConnectionError> {
    let mut connection = inner.connections.get_connection().await?;
    if connection.is_closed() {
        debug!("build server connection was closed, relaunching");
        connection = inner.connections.launch().await?;
    }

    // Route before initializing so that nothing the server sends during initialization is
    // lost. A relaunched connection gets a router of its own.
    connection.set_notification_handler(Arc::new(NotificationRouter {
        origins: inner.origins.clone(),
        sink: inner.sink.0.clone(),
    }));

    let handshake_error = |error| ConnectionError::Handshake {
        error: Arc::new(error),
    };
    let result: InitializeBuildResult = connection
        .request(
            methods::INITIALIZE,
            &inner.settings.initialize_params(),
            &CancelToken::never(),
        )
        .await
        .map_err(handshake_error)?;
    connection
        .notify(methods::INITIALIZED, &())
        .await
        .map_err(handshake_error)?;

    info!(
        "connected to {} {} (BSP {})",
        result.display_name, result.version, result.bsp_version
    );
    Ok(ReadyState {
        connection,
        result: Arc::new(result),
    })
}

/// Hands server notifications to origin handlers and the client sink.
struct NotificationRouter {
    origins: Arc<OriginRegistry>,
    sink: Arc<dyn ClientSink>,
}

impl NotificationHandler for NotificationRouter {
    fn handle_notification(&self, notification: Notification) {
        if let Err(error) = dispatch_notification(&notification, &self.origins, &*self.sink) {
            warn!(
                "ignoring malformed `{}` notification: {error}",
                notification.method
            );
        }
    }
}

fn dispatch_notification(
    notification: &Notification,
    origins: &OriginRegistry,
    sink: &dyn ClientSink,
) -> Result<(), serde_json::Error> {
    trace!("{}: {}", notification.method, notification.params);

    match notification.method.as_str() {
        methods::SHOW_MESSAGE => {
            let params: ShowMessageParams = decode(notification)?;
            let text = strip_ansi(&params.message);
            match params.message_type {
                MessageType::Log => sink.log_message(MessageType::Log, &text),
                message_type => sink.show_message(message_type, &text),
            }
        }
        methods::LOG_MESSAGE => {
            let params: LogMessageParams = decode(notification)?;
            let handled = origins.dispatch(params.origin_id.as_deref(), |handler| {
                handler.on_log_message(&params)
            });
            if !handled {
                sink.log_message(params.message_type, &strip_ansi(&params.message));
            }
        }
        methods::TASK_START => {
            let params: TaskStartParams = decode(notification)?;
            origins.dispatch(params.origin_id.as_deref(), |handler| {
                handler.on_task_start(&params)
            });
        }
        methods::TASK_PROGRESS => {
            let params: TaskProgressParams = decode(notification)?;
            origins.dispatch(params.origin_id.as_deref(), |handler| {
                handler.on_task_progress(&params)
            });
        }
        methods::TASK_FINISH => {
            let params: TaskFinishParams = decode(notification)?;
            origins.dispatch(params.origin_id.as_deref(), |handler| {
                handler.on_task_finish(&params)
            });
        }
        bazel::PUBLISH_OUTPUT => {
            let params: PublishOutputParams = decode(notification)?;
            origins.dispatch(Some(&params.origin_id), |handler| {
                handler.on_publish_output(&params)
            });
        }
        // Traced above.
        methods::PUBLISH_DIAGNOSTICS
        | methods::BUILD_TARGET_DID_CHANGE
        | methods::RUN_PRINT_STDOUT
        | methods::RUN_PRINT_STDERR => {}
        other => debug!("ignoring unknown notification `{other}`"),
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(notification: &Notification) -> Result<T, serde_json::Error> {
    T::deserialize(&notification.params)
}

type HandlerList = Vec<(u64, Arc<dyn OriginHandler>)>;

#[derive(Default)]
struct OriginRegistry {
    handlers: Mutex<HashMap<String, HandlerList>>,
    next_id: AtomicU64,
}

impl fmt::Debug for OriginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = lock(&self.handlers);
        f.debug_struct("OriginRegistry")
            .field("origins", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OriginRegistry {
    fn register(
        self: &Arc<Self>,
        origin_id: String,
        handler: Arc<dyn OriginHandler>,
    ) -> OriginRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("registering handler {id} for origin {origin_id}");
        lock(&self.handlers)
            .entry(origin_id.clone())
            .or_default()
            .push((id, handler));
        OriginRegistration {
            registry: Arc::downgrade(self),
            origin_id,
            id,
        }
    }

    fn deregister(&self, origin_id: &str, id: u64) {
        let mut handlers = lock(&self.handlers);
        if let Some(list) = handlers.get_mut(origin_id) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(origin_id);
            }
        }
    }

    /// Calls `f` on every handler registered for `origin_id`. Returns true if any of them
    /// consumed the notification.
    fn dispatch(
        &self,
        origin_id: Option<&str>,
        f: impl Fn(&dyn OriginHandler) -> bool,
    ) -> bool {
        let Some(origin_id) = origin_id else {
            return false;
        };
        // Handlers run outside the lock so that they can deregister themselves.
        let handlers: Vec<_> = lock(&self.handlers)
            .get(origin_id)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        let mut handled = false;
        for handler in &handlers {
            handled |= f(handler.as_ref());
        }
        handled
    }
}

/// Keeps an [`OriginHandler`] registered. The handler is removed when this is dropped.
#[derive(Debug)]
#[must_use = "the handler is deregistered when this is dropped"]
pub struct OriginRegistration {
    registry: Weak<OriginRegistry>,
    origin_id: String,
    id: u64,
}

impl OriginRegistration {
    /// Returns the origin ID this registration is for.
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }
}

impl Drop for OriginRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            debug!("deregistering handler {} for origin {}", self.id, self.origin_id);
            registry.deregister(&self.origin_id, self.id);
        }
    }
}
