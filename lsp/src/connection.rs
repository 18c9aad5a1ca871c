//! JSON-RPC connection over a framed byte stream.
//!
//! One reader task decodes frames and routes them: responses resolve the
//! matching pending request, notifications go to the registered handler for
//! their kind, and server-initiated requests are answered from the request
//! handler registry. One writer task owns the outbound half of the pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{LspError, Result};
use crate::protocol::{
    self, Notification, NotificationKind, Request, RequestKind, ResponseError, ServerNotification,
};

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub(crate) type NotificationHandler = Arc<dyn Fn(ServerNotification) + Send + Sync>;
pub(crate) type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> std::result::Result<Value, ResponseError> + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Hand a reply to the writer without waiting; the reader must keep
/// draining the server while the writer is backed up.
fn queue_reply(writer_tx: &mpsc::Sender<WriterCommand>, reply: Value, name: &str) -> bool {
    match writer_tx.try_send(WriterCommand::Send(reply)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!("Writer queue for '{name}' is full, dropping a server request reply");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

enum IncomingFrame {
    Response {
        id: u64,
        outcome: Result<Value>,
    },
    ServerRequest {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

fn parse_incoming(frame: Value) -> Option<IncomingFrame> {
    let Value::Object(mut obj) = frame else {
        return None;
    };
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let id = obj.remove("id").filter(|id| !id.is_null());

    match (id, method) {
        (Some(id), None) => {
            let id = id.as_u64()?;
            let outcome = if let Some(error) = obj.remove("error") {
                match serde_json::from_value::<ResponseError>(error) {
                    Ok(err) => Err(err.into()),
                    Err(e) => Err(LspError::Rpc {
                        code: protocol::INTERNAL_ERROR,
                        message: format!("malformed error object: {e}"),
                    }),
                }
            } else if let Some(result) = obj.remove("result") {
                Ok(result)
            } else {
                return None;
            };
            Some(IncomingFrame::Response { id, outcome })
        }
        (Some(id), Some(method)) => Some(IncomingFrame::ServerRequest {
            id,
            method,
            params: obj.remove("params"),
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification {
            method,
            params: obj.remove("params"),
        }),
        (None, None) => None,
    }
}

#[derive(Default)]
struct Handlers {
    notifications: HashMap<NotificationKind, NotificationHandler>,
    requests: HashMap<RequestKind, RequestHandler>,
}

type SharedHandlers = Arc<RwLock<Handlers>>;

/// State shared between the connection and its reader task.
struct ReaderContext {
    name: String,
    pending: PendingMap,
    handlers: SharedHandlers,
    writer_tx: mpsc::Sender<WriterCommand>,
    closed: Arc<AtomicBool>,
}

pub(crate) struct Connection {
    name: String,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    handlers: SharedHandlers,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Connection {
    /// Start the reader and writer tasks over the given pipe halves.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handlers: SharedHandlers = Arc::new(RwLock::new(Handlers::default()));
        let closed = Arc::new(AtomicBool::new(false));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_name = name.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error for '{writer_name}': {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
            let _ = writer.close().await;
        });

        let ctx = ReaderContext {
            name: name.clone(),
            pending: pending.clone(),
            handlers: handlers.clone(),
            writer_tx: writer_tx.clone(),
            closed: closed.clone(),
        };
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(body)) => Self::dispatch_frame(&body, &ctx).await,
                    Ok(None) => {
                        tracing::info!("LSP server '{}' closed stdout", ctx.name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP framing error for '{}': {e}", ctx.name);
                        break;
                    }
                }
            }
            fail_pending(&ctx.closed, &ctx.pending).await;
        });

        Self {
            name,
            writer_tx,
            next_id: AtomicU64::new(1),
            pending,
            handlers,
            closed,
            request_timeout,
            reader_handle,
            writer_handle,
        }
    }

    async fn dispatch_frame(body: &[u8], ctx: &ReaderContext) {
        let frame: Value = match serde_json::from_slice(body) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Dropping malformed JSON frame from '{}': {e}", ctx.name);
                return;
            }
        };
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame from '{}'", ctx.name);
            return;
        };

        match incoming {
            IncomingFrame::Response { id, outcome } => {
                let sender = ctx.pending.lock().await.remove(&id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::trace!("Dropping response for unknown or expired id {id}");
                    }
                }
            }
            IncomingFrame::ServerRequest { id, method, params } => {
                let handler = RequestKind::from_method(&method).and_then(|kind| {
                    ctx.handlers
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .requests
                        .get(&kind)
                        .cloned()
                });
                let outcome = match handler {
                    Some(handler) => handler(params),
                    None => {
                        tracing::debug!(
                            "LSP '{}' sent request: {method}, replying method not found",
                            ctx.name
                        );
                        Err(ResponseError::method_not_found(&method))
                    }
                };
                queue_reply(&ctx.writer_tx, protocol::response(id, outcome), &ctx.name);
            }
            IncomingFrame::Notification { method, params } => {
                let Some(kind) = NotificationKind::from_method(&method) else {
                    tracing::trace!("Ignoring notification from '{}': {method}", ctx.name);
                    return;
                };
                let handler = ctx
                    .handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .notifications
                    .get(&kind)
                    .cloned();
                let Some(handler) = handler else {
                    tracing::trace!("No handler for '{method}' from '{}'", ctx.name);
                    return;
                };
                match ServerNotification::decode(kind, params) {
                    Ok(notification) => handler(notification),
                    Err(e) => {
                        tracing::debug!("Failed to parse {method} from '{}': {e}", ctx.name);
                    }
                }
            }
        }
    }

    /// Register the handler for a notification kind, replacing any previous one.
    pub fn on_notification(&self, kind: NotificationKind, handler: NotificationHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .notifications
            .insert(kind, handler);
    }

    /// Register the handler for a server-initiated request kind, replacing any
    /// previous one.
    pub fn on_request(&self, kind: RequestKind, handler: RequestHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .insert(kind, handler);
    }

    /// Send a request and wait for the matching response.
    ///
    /// `timeout` overrides the connection's default request timeout. On
    /// timeout the pending slot is discarded, so a late response is dropped.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = timeout.unwrap_or(self.request_timeout);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(LspError::ConnectionClosed);
        }

        let request = Request::new(id, method, params);
        let frame = serde_json::to_value(&request).map_err(|e| LspError::protocol(method, e))?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(LspError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(LspError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::debug!("LSP '{}' request {method} (id {id}) timed out", self.name);
                Err(LspError::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a notification. Does not wait for the server.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = Notification::new(method, params);
        let frame =
            serde_json::to_value(&notification).map_err(|e| LspError::protocol(method, e))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| LspError::ConnectionClosed)
    }

    /// Whether the reader has stopped or `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop both tasks and fail every pending request with `ConnectionClosed`.
    ///
    /// Queued outbound frames are flushed before the write pipe is closed.
    pub async fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        self.reader_handle.abort();
        fail_pending(&self.closed, &self.pending).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

async fn fail_pending(closed: &AtomicBool, pending: &PendingMap) {
    closed.store(true, Ordering::SeqCst);
    let drained: Vec<_> = pending.lock().await.drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(LspError::ConnectionClosed));
    }
}
