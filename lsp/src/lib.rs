//! Minimal Language Server Protocol client.
//!
//! Launches a server as a child process, speaks `Content-Length` framed
//! JSON-RPC over its stdin/stdout, and keeps its stderr as a non-blocking
//! diagnostic stream.

pub mod codec;
pub mod message;
pub mod protocol;
pub mod types;

mod client;
mod connection;
mod diagnostics;
mod error;
mod process;

pub use client::LspClient;
pub use connection::Connection;
pub use error::{CallError, CallFailure, ClientError, FrameError};
pub use message::{Message, Notification, RequestId, ResponseError};
pub use protocol::{CompletionItem, Hover, InitializeResult, Location, Position};
pub use types::{ClientOptions, ExitReport, ServerConfig};
