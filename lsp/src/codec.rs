//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`encode`] and [`decode_body`] for single messages
//! and [`FrameReader`] / [`FrameWriter`] for async streams.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::FrameError;
use crate::message::Message;

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Serialize a message into one complete frame.
///
/// The header counts body bytes, not characters.
pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse and classify a frame body. The raw bytes are kept on failure.
pub fn decode_body(body: Vec<u8>) -> Result<Message, FrameError> {
    let value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(source) => return Err(FrameError::Parse { source, raw: body }),
    };
    Message::from_value(value).map_err(|reason| FrameError::NotAMessage { reason, raw: body })
}

/// Reads framed messages from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    /// After a parse error or an oversized frame the reader is positioned at
    /// the next frame and may be used again.
    pub async fn read_message(&mut self) -> Result<Option<Message>, FrameError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            self.skip_body(content_length).await?;
            return Err(FrameError::Oversized {
                length: content_length,
                max: MAX_FRAME_BYTES,
            });
        }

        let body = self.read_body(content_length).await?;
        decode_body(body).map(Some)
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF before any header
    /// byte. A bad header does not stop the scan, so the stream ends up at
    /// the body either way.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length: Option<Result<usize, String>> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

            if bytes_read == 0 {
                // Note: EOF after a Content-Type line alone is still mid-frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FrameError::TruncatedHeaders);
            }
            saw_any_header_bytes = true;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are case-insensitive.
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                content_length = Some(value.parse::<usize>().map_err(|_| value.to_string()));
            }
            // Ignore other headers (e.g. Content-Type)
        }

        match content_length {
            Some(Ok(len)) => Ok(Some(len)),
            Some(Err(value)) => Err(FrameError::InvalidContentLength(value)),
            None => Err(FrameError::MissingContentLength),
        }
    }

    async fn read_body(&mut self, length: usize) -> Result<Vec<u8>, FrameError> {
        let mut body = Vec::with_capacity(length);
        let received = (&mut self.reader)
            .take(length as u64)
            .read_to_end(&mut body)
            .await?;
        if received < length {
            return Err(FrameError::TruncatedBody {
                expected: length,
                received,
            });
        }
        Ok(body)
    }

    async fn skip_body(&mut self, length: usize) -> Result<(), FrameError> {
        let mut limited = (&mut self.reader).take(length as u64);
        let skipped = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if skipped < length as u64 {
            return Err(FrameError::TruncatedBody {
                expected: length,
                received: skipped as usize,
            });
        }
        Ok(())
    }
}

/// Writes framed messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    pub async fn write_message(&mut self, message: &Message) -> io::Result<()> {
        let frame = encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    /// Close the underlying stream (EOF for the peer).
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
