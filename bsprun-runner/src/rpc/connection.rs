// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::framing::{FrameReader, write_frame};
use crate::{
    cancel::CancelToken,
    errors::{DisplayErrorChain, RequestError},
    helpers::lock,
};
use bsprun_metadata::{CancelRequestParams, error_codes, methods};
use debug_ignore::DebugIgnore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    process::Child,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte streams to a build server, plus the server process if there is one.
pub struct ServerChannel {
    reader: BoxedReader,
    writer: BoxedWriter,
    child: Option<Child>,
}

impl ServerChannel {
    /// Creates a channel over the given streams.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Attaches the server process, which is terminated when the connection is closed.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

impl fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerChannel")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// A notification sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// The notification method, e.g. `build/logMessage`.
    pub method: String,
    /// The params, or `Value::Null` if none were sent.
    pub params: Value,
}

/// Receives server notifications.
///
/// The handler is called on the connection's reader task, in the order notifications arrive
/// and before any response that follows them is delivered. It must not block.
pub trait NotificationHandler: Send + Sync {
    /// Handles one notification.
    fn handle_notification(&self, notification: Notification);
}

enum NotificationDispatch {
    Buffering(Vec<Notification>),
    Handler(Arc<dyn NotificationHandler>),
}

impl NotificationDispatch {
    fn dispatch(&mut self, notification: Notification) {
        match self {
            Self::Buffering(buffer) => buffer.push(notification),
            Self::Handler(handler) => handler.handle_notification(notification),
        }
    }
}

impl fmt::Debug for NotificationDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffering(buffer) => write!(f, "Buffering({} notifications)", buffer.len()),
            Self::Handler(_) => write!(f, "Handler"),
        }
    }
}

/// A JSON-RPC connection to a build server.
///
/// Cloning is cheap; all clones share the same underlying streams.
#[derive(Clone, Debug)]
pub struct RpcConnection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    writer: Arc<MessageWriter>,
    pending: Arc<Mutex<PendingRequests>>,
    next_id: AtomicU64,
    notifications: Arc<Mutex<NotificationDispatch>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    cancel_grace_period: Duration,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}

#[derive(Debug, Default)]
struct PendingRequests {
    senders: HashMap<u64, oneshot::Sender<Result<Value, ErrorObject>>>,
    closed: bool,
}

impl PendingRequests {
    /// Marks the connection closed. Dropping the senders wakes every waiter.
    fn close(&mut self) {
        self.closed = true;
        self.senders.clear();
    }
}

/// Removes a request's pending entry if the request future is dropped early.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingRequests>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).senders.remove(&self.id);
    }
}

#[derive(Debug)]
struct MessageWriter {
    writer: DebugIgnore<tokio::sync::Mutex<Option<BoxedWriter>>>,
}

impl MessageWriter {
    async fn send(&self, body: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        trace!("--> {}", String::from_utf8_lossy(body));
        write_frame(writer, body).await
    }

    async fn shutdown(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(error) = writer.shutdown().await {
                debug!("error closing build server input: {error}");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcConnection {
    /// Starts a connection over `channel` and spawns its reader task.
    ///
    /// A request whose cancellation token fires is given `cancel_grace_period` to be answered
    /// by the server after `$/cancelRequest` is forwarded. Must be called from within a tokio
    /// runtime.
    pub fn new(channel: ServerChannel, cancel_grace_period: Duration) -> Self {
        let ServerChannel {
            reader,
            writer,
            child,
        } = channel;

        let writer = Arc::new(MessageWriter {
            writer: DebugIgnore(tokio::sync::Mutex::new(Some(writer))),
        });
        let pending = Arc::new(Mutex::new(PendingRequests::default()));
        let notifications = Arc::new(Mutex::new(NotificationDispatch::Buffering(Vec::new())));

        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(reader),
            writer.clone(),
            pending.clone(),
            notifications.clone(),
        ));

        Self {
            inner: Arc::new(ConnectionInner {
                writer,
                pending,
                next_id: AtomicU64::new(1),
                notifications,
                reader_task: Mutex::new(Some(reader_task)),
                child: Mutex::new(child),
                cancel_grace_period,
            }),
        }
    }

    /// Sets the handler for server notifications.
    ///
    /// Notifications received before this is called are buffered and handed to `handler`
    /// first. Returns false, leaving the existing handler in place, if a handler was already
    /// set.
    pub fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) -> bool {
        let mut dispatch = lock(&self.inner.notifications);
        let buffered = match &mut *dispatch {
            NotificationDispatch::Buffering(buffer) => std::mem::take(buffer),
            NotificationDispatch::Handler(_) => return false,
        };
        for notification in buffered {
            handler.handle_notification(notification);
        }
        *dispatch = NotificationDispatch::Handler(handler);
        true
    }

    /// Returns true once the connection has been closed by either side.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.pending).closed
    }

    /// Returns true if both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a request and waits for its response.
    ///
    /// If `cancel` fires first, `$/cancelRequest` is sent to the server, and the request resolves
    /// with whatever the server answers within the grace period, or [`RequestError::Cancelled`].
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: &P,
        cancel: &CancelToken,
    ) -> Result<R, RequestError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = encode_params(method, params)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let (sender, mut receiver) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            if pending.closed {
                return Err(RequestError::ConnectionClosed {
                    method: method.to_owned(),
                });
            }
            pending.senders.insert(id, sender);
        }
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        self.send(method, outgoing_message(Some(id), method, params))
            .await?;

        let response = tokio::select! {
            biased;
            response = &mut receiver => response,
            () = cancel.cancelled() => {
                debug!("forwarding cancellation of `{method}` (request {id})");
                if let Err(error) = self
                    .notify(methods::CANCEL_REQUEST, &CancelRequestParams { id })
                    .await
                {
                    debug!(
                        "failed to forward cancellation: {}",
                        DisplayErrorChain::new(&error)
                    );
                }
                match tokio::time::timeout(self.inner.cancel_grace_period, &mut receiver).await {
                    Ok(response) => response,
                    Err(_) => {
                        debug!("no response to cancelled `{method}` (request {id}), giving up");
                        return Err(RequestError::Cancelled {
                            method: method.to_owned(),
                        });
                    }
                }
            }
        };

        match response {
            Ok(Ok(result)) => {
                serde_json::from_value(result).map_err(|error| RequestError::Decode {
                    method: method.to_owned(),
                    error: Arc::new(error),
                })
            }
            Ok(Err(error)) => Err(classify_error(method, error, cancel)),
            Err(_) => Err(RequestError::ConnectionClosed {
                method: method.to_owned(),
            }),
        }
    }

    /// Sends a notification.
    pub async fn notify<P>(&self, method: &str, params: &P) -> Result<(), RequestError>
    where
        P: Serialize + ?Sized,
    {
        let params = encode_params(method, params)?;
        self.send(method, outgoing_message(None, method, params))
            .await
    }

    /// Closes the connection.
    ///
    /// Pending requests fail with [`RequestError::ConnectionClosed`]. The server's input is
    /// closed, and the server process, if any, is given the cancellation grace period to exit
    /// before it is killed.
    pub async fn close(&self) {
        lock(&self.inner.pending).close();
        if let Some(task) = lock(&self.inner.reader_task).take() {
            task.abort();
        }
        self.inner.writer.shutdown().await;

        let child = lock(&self.inner.child).take();
        if let Some(mut child) = child {
            let exited = tokio::time::timeout(self.inner.cancel_grace_period, child.wait()).await;
            match exited {
                Ok(Ok(status)) => debug!("build server exited with {status}"),
                Ok(Err(error)) => debug!("error waiting for build server: {error}"),
                Err(_) => {
                    debug!("build server did not exit, killing it");
                    if let Err(error) = child.kill().await {
                        warn!("failed to kill build server: {error}");
                    }
                }
            }
        }
    }

    async fn send(&self, method: &str, message: Value) -> Result<(), RequestError> {
        let body = serde_json::to_vec(&message).map_err(|error| RequestError::Encode {
            method: method.to_owned(),
            error: Arc::new(error),
        })?;
        self.inner
            .writer
            .send(&body)
            .await
            .map_err(|error| RequestError::Write {
                method: method.to_owned(),
                error: Arc::new(error),
            })
    }
}

fn encode_params<P: Serialize + ?Sized>(method: &str, params: &P) -> Result<Value, RequestError> {
    serde_json::to_value(params).map_err(|error| RequestError::Encode {
        method: method.to_owned(),
        error: Arc::new(error),
    })
}

fn outgoing_message(id: Option<u64>, method: &str, params: Value) -> Value {
    let mut message = json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let Some(id) = id {
        message["id"] = id.into();
    }
    if !params.is_null() {
        message["params"] = params;
    }
    message
}

fn classify_error(method: &str, error: ErrorObject, cancel: &CancelToken) -> RequestError {
    // Bazel BSP reports interrupted requests as internal errors.
    let cancelled = error.code == error_codes::REQUEST_CANCELLED
        || (error.code == error_codes::INTERNAL_ERROR && cancel.is_cancelled());
    if cancelled {
        RequestError::Cancelled {
            method: method.to_owned(),
        }
    } else {
        RequestError::Server {
            method: method.to_owned(),
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

async fn read_loop(
    mut reader: FrameReader<BoxedReader>,
    writer: Arc<MessageWriter>,
    pending: Arc<Mutex<PendingRequests>>,
    notifications: Arc<Mutex<NotificationDispatch>>,
) {
    loop {
        let body = match reader.read_frame().await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!("build server closed its output");
                break;
            }
            Err(error) => {
                warn!(
                    "error reading from build server, closing connection: {}",
                    DisplayErrorChain::new(&error)
                );
                break;
            }
        };
        trace!("<-- {}", String::from_utf8_lossy(&body));

        let message: IncomingMessage = match serde_json::from_slice(&body) {
            Ok(message) => message,
            Err(error) => {
                warn!("ignoring malformed message from build server: {error}");
                continue;
            }
        };

        match (message.id, message.method) {
            (Some(id), Some(method)) => {
                debug!("build server sent unsupported request `{method}`");
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": error_codes::METHOD_NOT_FOUND,
                        "message": format!("method not found: {method}"),
                    },
                });
                let sent = match serde_json::to_vec(&response) {
                    Ok(body) => writer.send(&body).await,
                    Err(error) => Err(error.into()),
                };
                if let Err(error) = sent {
                    debug!("failed to reject `{method}`: {error}");
                }
            }
            (None, Some(method)) => {
                lock(&notifications).dispatch(Notification {
                    method,
                    params: message.params.unwrap_or(Value::Null),
                });
            }
            (Some(id), None) => {
                let Some(id) = id.as_u64() else {
                    warn!("ignoring response with unexpected id {id}");
                    continue;
                };
                let sender = lock(&pending).senders.remove(&id);
                let Some(sender) = sender else {
                    debug!("ignoring response to unknown request {id}");
                    continue;
                };
                let payload = match message.error {
                    Some(error) => Err(error),
                    None => Ok(message.result.unwrap_or(Value::Null)),
                };
                _ = sender.send(payload);
            }
            (None, None) => warn!("ignoring message with neither id nor method"),
        }
    }

    lock(&pending).close();
}
