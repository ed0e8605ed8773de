//! Client handle: owns a language server process and its three streams.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Child;

use crate::connection::Connection;
use crate::diagnostics::DiagnosticStream;
use crate::error::{CallError, ClientError};
use crate::message::Notification;
use crate::process;
use crate::protocol::{
    self, CompletionItem, CompletionResponse, DefinitionResponse, Hover, InitializeResult,
    Location, Position,
};
use crate::types::{ClientOptions, ExitReport, ServerConfig};

/// How long `close` keeps reading stderr after the server has exited.
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// A running language server and the connection to it.
///
/// Dropping the client without [`LspClient::close`] kills the server.
pub struct LspClient {
    name: String,
    connection: Connection,
    diagnostics: DiagnosticStream,
    child: Child,
    shutdown_timeout: Duration,
}

impl LspClient {
    /// Launch the server and start reading its stdout and stderr.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(config: &ServerConfig, options: &ClientOptions) -> Result<Self, ClientError> {
        let mut child = process::spawn(config)?;
        let stdin = child.stdin.take().ok_or(ClientError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ClientError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ClientError::MissingPipe("stderr"))?;

        let name = config.command.clone();
        tracing::info!(server = %name, pid = ?child.id(), args = ?config.command_args(), "started LSP server");

        let diagnostics = DiagnosticStream::spawn(&name, stderr, options.diagnostic_capacity);
        let connection = Connection::new(&name, stdout, stdin, options);

        Ok(Self {
            name,
            connection,
            diagnostics,
            child,
            shutdown_timeout: options.shutdown_timeout(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, `None` once the server has been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        self.connection.call(method, params).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.connection
            .notify(method, params)
            .await
            .map_err(|cause| ClientError::Notify {
                method: method.to_string(),
                cause,
            })
    }

    /// Server stderr lines buffered since the last drain. Never waits.
    pub fn drain_diagnostics(&mut self) -> Vec<String> {
        self.diagnostics.drain()
    }

    /// Stderr lines discarded so far because nobody drained them in time.
    #[must_use]
    pub fn dropped_diagnostics(&self) -> u64 {
        self.diagnostics.dropped()
    }

    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.connection.next_notification().await
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.connection.drain_notifications()
    }

    /// Terminate the server and reap it.
    ///
    /// Closes stdin, requests termination, waits the shutdown timeout, then
    /// kills. The report carries the stderr lines that were never drained.
    pub async fn close(mut self) -> Result<ExitReport, ClientError> {
        if let Err(e) = self.connection.close_input().await {
            tracing::debug!("closing stdin of '{}' failed: {e}", self.name);
        }

        let status = process::terminate(&mut self.child, &self.name, self.shutdown_timeout)
            .await
            .map_err(ClientError::Wait)?;
        let (diagnostics, dropped) = self.diagnostics.finish(STDERR_GRACE).await;

        tracing::info!(server = %self.name, %status, "LSP server exited");
        Ok(ExitReport::new(status, diagnostics, dropped))
    }

    pub async fn initialize(
        &self,
        root_uri: &str,
        capabilities: Value,
    ) -> Result<InitializeResult, ClientError> {
        let params = protocol::initialize_params(root_uri, capabilities);
        let result = self.call("initialize", Some(params)).await?;
        parse_result("initialize", result)
    }

    pub async fn initialized(&self) -> Result<(), ClientError> {
        self.notify("initialized", Some(serde_json::json!({})))
            .await
    }

    pub async fn did_open(
        &self,
        uri: &str,
        language_id: &str,
        version: i32,
        text: &str,
    ) -> Result<(), ClientError> {
        let params = protocol::did_open_params(uri, language_id, version, text);
        self.notify("textDocument/didOpen", Some(params)).await
    }

    /// Full-document sync: `text` replaces the whole buffer.
    pub async fn did_change(&self, uri: &str, version: i32, text: &str) -> Result<(), ClientError> {
        let params = protocol::did_change_params(uri, version, text);
        self.notify("textDocument/didChange", Some(params)).await
    }

    pub async fn did_close(&self, uri: &str) -> Result<(), ClientError> {
        self.notify("textDocument/didClose", Some(protocol::did_close_params(uri)))
            .await
    }

    pub async fn hover(&self, uri: &str, position: Position) -> Result<Option<Hover>, ClientError> {
        let params = protocol::text_document_position_params(uri, position);
        let result = self.call("textDocument/hover", Some(params)).await?;
        parse_result("textDocument/hover", result)
    }

    /// Completion items at `position`, whether the server answers with a
    /// list, a bare array, or `null`.
    pub async fn completion(
        &self,
        uri: &str,
        position: Position,
    ) -> Result<Vec<CompletionItem>, ClientError> {
        let params = protocol::text_document_position_params(uri, position);
        let result = self.call("textDocument/completion", Some(params)).await?;
        let response: Option<CompletionResponse> =
            parse_result("textDocument/completion", result)?;
        Ok(response.map(CompletionResponse::into_items).unwrap_or_default())
    }

    /// Definition locations; `LocationLink` results are reduced to their
    /// target selection.
    pub async fn definition(
        &self,
        uri: &str,
        position: Position,
    ) -> Result<Vec<Location>, ClientError> {
        let params = protocol::text_document_position_params(uri, position);
        let result = self.call("textDocument/definition", Some(params)).await?;
        let response: Option<DefinitionResponse> =
            parse_result("textDocument/definition", result)?;
        Ok(response
            .map(DefinitionResponse::into_locations)
            .unwrap_or_default())
    }

    /// Polite LSP shutdown: `shutdown` request, then `exit`. The process is
    /// still reaped by [`LspClient::close`].
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.call("shutdown", None).await?;
        self.notify("exit", None).await
    }
}

fn parse_result<T: DeserializeOwned>(method: &'static str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::UnexpectedResult { method, source })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_null_hover_is_none() {
        let hover: Option<Hover> = parse_result("textDocument/hover", Value::Null).unwrap();
        assert!(hover.is_none());
    }

    #[test]
    fn test_parse_null_definition_is_none() {
        let definition: Option<DefinitionResponse> =
            parse_result("textDocument/definition", Value::Null).unwrap();
        assert!(definition.is_none());
    }

    #[test]
    fn test_parse_wrong_shape_names_method() {
        let err = parse_result::<InitializeResult>("initialize", json!("ready")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedResult {
                method: "initialize",
                ..
            }
        ));
        assert!(err.to_string().contains("initialize"));
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let config = ServerConfig::new("lsprobe-definitely-not-installed");
        let Err(err) = LspClient::spawn(&config, &ClientOptions::default()) else {
            panic!("spawn should fail");
        };
        assert!(matches!(err, ClientError::CommandNotFound { .. }), "{err}");
    }
}
