//! Request/response correlation over one framed byte stream.
//!
//! A [`Connection`] owns both directions of the protocol stream:
//!
//! ```text
//! call() ──register id──▶ pending ◀──complete── reader task ◀── FrameReader ◀── peer
//!    └──────────▶ writer lock ──▶ FrameWriter ──▶ peer          │
//!                                                              └─▶ notifications (mpsc)
//! ```
//!
//! The reader task is the only consumer of incoming frames. Responses are
//! handed to the waiter registered under their id; notifications go to a
//! bounded channel; requests from the peer are answered "method not found".
//! Writes are serialized by a single lock, so frames never interleave.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{CallError, CallFailure};
use crate::message::{
    METHOD_NOT_FOUND, Message, Notification, Request, RequestId, Response, ResponseError,
};
use crate::types::ClientOptions;

type Outcome = Result<Value, CallFailure>;

/// `None` once our side of the stream has been closed.
type SharedWriter = Arc<Mutex<Option<FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>>>>;

#[derive(Default)]
struct PendingState {
    calls: HashMap<RequestId, oneshot::Sender<Outcome>>,
    /// Set once the reader has stopped; no waiter could ever be answered.
    closed: bool,
}

/// Pending call table shared between callers and the reader task.
#[derive(Clone, Default)]
struct PendingCalls(Arc<Mutex<PendingState>>);

impl PendingCalls {
    /// Returns `None` when the stream has already closed.
    async fn register(&self, id: RequestId) -> Option<oneshot::Receiver<Outcome>> {
        let mut state = self.0.lock().await;
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Some(rx)
    }

    /// Deliver an outcome. Returns false when nobody was waiting for `id`.
    async fn complete(&self, id: &RequestId, outcome: Outcome) -> bool {
        let waiter = self.0.lock().await.calls.remove(id);
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Forget a call; a late response for it will be discarded.
    async fn abandon(&self, id: &RequestId) {
        self.0.lock().await.calls.remove(id);
    }

    async fn fail_all(&self, failure: &CallFailure) -> usize {
        let waiters: Vec<_> = self.0.lock().await.calls.drain().collect();
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(failure.clone()));
        }
        count
    }

    async fn close(&self) {
        let waiters: Vec<_> = {
            let mut state = self.0.lock().await;
            state.closed = true;
            state.calls.drain().collect()
        };
        for (_, tx) in waiters {
            let _ = tx.send(Err(CallFailure::TransportClosed));
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.0.lock().await.calls.len()
    }
}

/// One JSON-RPC conversation over a pair of byte streams.
pub struct Connection {
    server: String,
    writer: SharedWriter,
    next_id: AtomicI64,
    pending: PendingCalls,
    notifications: mpsc::Receiver<Notification>,
    request_timeout: Option<Duration>,
    reader_handle: JoinHandle<()>,
}

impl Connection {
    /// Start the reader task. Must be called inside a tokio runtime.
    pub fn new<R, W>(server: &str, reader: R, writer: W, options: &ClientOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Some(FrameWriter::new(Box::new(writer)))));
        let pending = PendingCalls::default();
        let (notification_tx, notifications) =
            mpsc::channel(options.notification_capacity.max(1));

        let reader_handle = tokio::spawn(read_loop(
            server.to_string(),
            FrameReader::new(reader),
            pending.clone(),
            notification_tx,
            Arc::clone(&writer),
        ));

        Self {
            server: server.to_string(),
            writer,
            next_id: AtomicI64::new(1),
            pending,
            notifications,
            request_timeout: options.request_timeout(),
            reader_handle,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Other traffic arriving in the meantime is routed by the reader task;
    /// only the response carrying this call's id resolves it.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let fail = |cause| CallError::new(method, id.clone(), cause);

        let Some(rx) = self.pending.register(id.clone()).await else {
            return Err(fail(CallFailure::TransportClosed));
        };

        tracing::debug!(server = %self.server, %id, method, "sending request");
        let request = Message::Request(Request::new(id.clone(), method, params));
        if let Err(e) = self.write(&request).await {
            // Don't leak the pending entry when the request never left.
            self.pending.abandon(&id).await;
            return Err(fail(CallFailure::from_write(e)));
        }

        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.abandon(&id).await;
                    tracing::warn!(server = %self.server, %id, method, "request timed out");
                    return Err(fail(CallFailure::Timeout(limit)));
                }
            },
            None => rx.await,
        };

        match received {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(cause)) => Err(fail(cause)),
            Err(_) => Err(fail(CallFailure::TransportClosed)),
        }
    }

    /// Send a notification. Returns once the frame is written and flushed.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallFailure> {
        tracing::debug!(server = %self.server, method, "sending notification");
        let notification = Message::Notification(Notification::new(method, params));
        self.write(&notification)
            .await
            .map_err(CallFailure::from_write)
    }

    /// Wait for the next notification from the peer.
    ///
    /// Returns `None` once the stream has closed and the queue is empty.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Take every queued notification, in arrival order, without waiting.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            out.push(notification);
        }
        out
    }

    /// Whether the reader has stopped (peer closed or stream failed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader_handle.is_finished()
    }

    /// Close our side of the stream so the peer sees EOF. Later writes fail
    /// with `TransportClosed`.
    pub async fn close_input(&self) -> io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    async fn write(&self, message: &Message) -> io::Result<()> {
        write_shared(&self.writer, message).await
    }
}

async fn write_shared(writer: &SharedWriter, message: &Message) -> io::Result<()> {
    match writer.lock().await.as_mut() {
        Some(writer) => writer.write_message(message).await,
        None => Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "protocol input already closed",
        )),
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    server: String,
    mut reader: FrameReader<R>,
    pending: PendingCalls,
    notifications: mpsc::Sender<Notification>,
    writer: SharedWriter,
) {
    loop {
        match reader.read_message().await {
            Ok(Some(message)) => {
                dispatch(&server, message, &pending, &notifications, &writer).await;
            }
            Ok(None) => {
                tracing::info!("LSP server '{server}' closed stdout");
                break;
            }
            Err(e) if e.ends_stream() => {
                tracing::warn!("LSP reader error for '{server}': {e}");
                pending.fail_all(&CallFailure::Frame(Arc::new(e))).await;
                break;
            }
            Err(e) => {
                if let Some(raw) = e.raw() {
                    tracing::debug!(
                        "Malformed frame body from '{server}': {}",
                        String::from_utf8_lossy(raw)
                    );
                }
                tracing::warn!("Bad frame from '{server}': {e}");
                let failed = pending.fail_all(&CallFailure::Frame(Arc::new(e))).await;
                if failed > 0 {
                    tracing::debug!("Failed {failed} pending call(s) after bad frame");
                }
            }
        }
    }
    pending.close().await;
}

async fn dispatch(
    server: &str,
    message: Message,
    pending: &PendingCalls,
    notifications: &mpsc::Sender<Notification>,
    writer: &SharedWriter,
) {
    match message {
        Message::Response(Response { id, result }) => {
            let Some(id) = id else {
                tracing::warn!("Discarding response without id from '{server}': {result:?}");
                return;
            };
            let outcome = result.map_err(CallFailure::Remote);
            if !pending.complete(&id, outcome).await {
                tracing::warn!(%id, "Discarding response from '{server}' for unknown or abandoned request");
            }
        }
        Message::Notification(notification) => {
            tracing::debug!(method = %notification.method, "Notification from '{server}'");
            match notifications.try_send(notification) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        "Notification queue full; dropping {} from '{server}'",
                        dropped.method
                    );
                }
                Err(mpsc::error::TrySendError::Closed(dropped)) => {
                    tracing::trace!("No notification consumer for {}", dropped.method);
                }
            }
        }
        Message::Request(request) => {
            // Unanswered server requests (registerCapability, configuration) can stall the server.
            tracing::debug!(
                "LSP '{server}' sent request {}; replying method not found",
                request.method
            );
            let reply = Message::Response(Response::err(
                request.id,
                ResponseError::new(
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                ),
            ));
            // Written from a separate task so the reader never waits on the writer lock.
            let writer = Arc::clone(writer);
            let server = server.to_string();
            tokio::spawn(async move {
                if let Err(e) = write_shared(&writer, &reply).await {
                    tracing::warn!("LSP write error replying to '{server}': {e}");
                }
            });
        }
    }
}
