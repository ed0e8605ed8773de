//! Server stderr capture.
//!
//! A dedicated task reads the server's stderr line by line into a bounded
//! channel; [`DiagnosticStream::drain`] takes whatever has arrived without
//! waiting. The stream is advisory: read errors end the task quietly and a
//! full buffer drops the newest line (counted, never blocking the server).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) struct DiagnosticStream {
    lines: mpsc::Receiver<String>,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl DiagnosticStream {
    pub fn spawn<R>(server: &str, source: R, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, lines) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let task_dropped = Arc::clone(&dropped);
        let server = server.to_string();

        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(source);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        tracing::trace!(target: "lsprobe_lsp::server_stderr", server = %server, "{text}");
                        match tx.try_send(text) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                task_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(e) => {
                        tracing::debug!("stderr of '{server}' unreadable: {e}");
                        break;
                    }
                }
            }
        });

        Self {
            lines,
            dropped,
            handle,
        }
    }

    /// Take every buffered line. Never waits.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            out.push(line);
        }
        out
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait up to `grace` for the stream to reach EOF, then take what is left.
    ///
    /// Returns the remaining lines and the total dropped count.
    pub async fn finish(mut self, grace: Duration) -> (Vec<String>, u64) {
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            self.handle.abort();
        }
        let lines = self.drain();
        (lines, self.dropped())
    }
}

impl Drop for DiagnosticStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
