//! JSON-RPC 2.0 over a child's stdio
//!
//! Messages are framed with a `Content-Length` header. A reader task routes
//! responses to their waiting request and forwards notifications to a
//! channel.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Frames larger than this are treated as a corrupt stream
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const METHOD_NOT_FOUND: i64 = -32601;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type ResponseWaiter = oneshot::Sender<Result<Value, RpcError>>;
type PendingRequests = Arc<Mutex<HashMap<u64, ResponseWaiter>>>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Server-initiated message without an id
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

/// Write one framed message
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one framed message. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ));
            }
            return Ok(None);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad Content-Length: {e}"))
                })?;
                content_length = Some(len);
            }
        }
    }

    let len = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "frame without Content-Length")
    })?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }

    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// One JSON-RPC connection. Dropping it stops the reader task and closes
/// the write half.
pub struct RpcConnection {
    writer: Arc<Mutex<BoxedWriter>>,
    pending: PendingRequests,
    notifications: mpsc::UnboundedReceiver<Notification>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl RpcConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Arc<Mutex<BoxedWriter>> = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (tx, notifications) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            BufReader::new(reader),
            writer.clone(),
            pending.clone(),
            tx,
        ));

        Self {
            writer,
            pending,
            notifications,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        tracing::trace!(id, method, "RPC request");
        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &message).await
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Io(e));
        }

        rx.await.unwrap_or(Err(RpcError::Closed))
    }

    /// Next notification, or `None` once the stream has closed
    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut reader: R,
    writer: Arc<Mutex<BoxedWriter>>,
    pending: PendingRequests,
    notifications: mpsc::UnboundedSender<Notification>,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!("RPC stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "RPC stream failed");
                break;
            }
        };

        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let method = message.get("method").and_then(Value::as_str).map(str::to_string);

        match (id, method) {
            (Some(id), None) => route_response(&pending, &id, &message).await,
            (None, Some(method)) => {
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                // Receiver gone means nobody is waiting on events any more
                let _ = notifications.send(Notification { method, params });
            }
            (Some(id), Some(method)) => {
                tracing::warn!(method = %method, "Unsupported request from runtime");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": METHOD_NOT_FOUND, "message": format!("method not found: {method}")},
                });
                let mut writer = writer.lock().await;
                if let Err(e) = write_frame(&mut *writer, &reply).await {
                    tracing::warn!(error = %e, "Failed to reject runtime request");
                }
            }
            (None, None) => tracing::warn!("Discarding RPC message without id or method"),
        }
    }

    // Fail everything still waiting
    for (_, waiter) in pending.lock().await.drain() {
        let _ = waiter.send(Err(RpcError::Closed));
    }
}

async fn route_response(pending: &PendingRequests, id: &Value, message: &Value) {
    let Some(id) = id.as_u64() else {
        tracing::warn!(id = %id, "Response with non-numeric id");
        return;
    };
    let Some(waiter) = pending.lock().await.remove(&id) else {
        tracing::warn!(id, "Response for unknown request");
        return;
    };

    let outcome = if let Some(error) = message.get("error") {
        match serde_json::from_value::<RemoteError>(error.clone()) {
            Ok(e) => Err(RpcError::Remote {
                code: e.code,
                message: e.message,
            }),
            Err(e) => Err(RpcError::Protocol(format!("malformed error object: {e}"))),
        }
    } else {
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    };
    let _ = waiter.send(outcome);
}
