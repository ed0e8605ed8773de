//! LSP params builders and result types for the requests the client makes.
//!
//! Only the fields the client reads are modelled; everything else the server
//! sends is ignored on deserialization.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

/// Zero-based line and UTF-16 character offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationLink {
    #[serde(default)]
    pub origin_selection_range: Option<Range>,
    pub target_uri: String,
    pub target_range: Range,
    pub target_selection_range: Range,
}

impl From<LocationLink> for Location {
    fn from(link: LocationLink) -> Self {
        Self {
            uri: link.target_uri,
            range: link.target_selection_range,
        }
    }
}

/// Any of the result shapes `textDocument/definition` may return.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DefinitionResponse {
    Single(Location),
    Locations(Vec<Location>),
    Links(Vec<LocationLink>),
}

impl DefinitionResponse {
    #[must_use]
    pub fn into_locations(self) -> Vec<Location> {
        match self {
            Self::Single(location) => vec![location],
            Self::Locations(locations) => locations,
            Self::Links(links) => links.into_iter().map(Location::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hover {
    /// `MarkupContent`, a `MarkedString`, or an array of `MarkedString`.
    pub contents: Value,
    #[serde(default)]
    pub range: Option<Range>,
}

impl Hover {
    /// Plain text of the hover contents, sections separated by blank lines.
    #[must_use]
    pub fn text(&self) -> String {
        fn piece(value: &Value) -> Option<&str> {
            match value {
                Value::String(s) => Some(s),
                Value::Object(obj) => obj.get("value").and_then(Value::as_str),
                _ => None,
            }
        }

        match &self.contents {
            Value::Array(items) => items
                .iter()
                .filter_map(piece)
                .collect::<Vec<_>>()
                .join("\n\n"),
            other => piece(other).unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub insert_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionList {
    #[serde(default)]
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CompletionResponse {
    List(CompletionList),
    Items(Vec<CompletionItem>),
}

impl CompletionResponse {
    #[must_use]
    pub fn into_items(self) -> Vec<CompletionItem> {
        match self {
            Self::List(list) => list.items,
            Self::Items(items) => items,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Raw `ServerCapabilities` object with lookups for the providers we probe.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilities(Map<String, Value>);

impl ServerCapabilities {
    /// A provider counts as present unless absent, `null`, or `false`.
    #[must_use]
    pub fn provides(&self, key: &str) -> bool {
        !matches!(self.0.get(key), None | Some(Value::Null | Value::Bool(false)))
    }

    #[must_use]
    pub fn hover(&self) -> bool {
        self.provides("hoverProvider")
    }

    #[must_use]
    pub fn completion(&self) -> bool {
        self.provides("completionProvider")
    }

    #[must_use]
    pub fn definition(&self) -> bool {
        self.provides("definitionProvider")
    }

    #[must_use]
    pub fn rename(&self) -> bool {
        self.provides("renameProvider")
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u8>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

/// Hover, completion, definition and rename without dynamic registration,
/// plus work-done progress.
#[must_use]
pub fn default_client_capabilities() -> Value {
    serde_json::json!({
        "textDocument": {
            "hover": { "dynamicRegistration": false },
            "completion": { "dynamicRegistration": false },
            "definition": { "dynamicRegistration": false },
            "rename": { "dynamicRegistration": false },
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": false
            },
            "publishDiagnostics": {
                "relatedInformation": false
            }
        },
        "window": {
            "workDoneProgress": true
        }
    })
}

#[must_use]
pub fn initialize_params(root_uri: &str, capabilities: Value) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": capabilities,
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

#[must_use]
pub fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

#[must_use]
pub fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

#[must_use]
pub fn did_close_params(uri: &str) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

#[must_use]
pub fn text_document_position_params(uri: &str, position: Position) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn range(line: u32) -> Value {
        json!({ "start": { "line": line, "character": 0 }, "end": { "line": line, "character": 5 } })
    }

    #[test]
    fn test_initialize_params_has_required_fields() {
        let params = initialize_params("file:///workspace", default_client_capabilities());
        assert!(params["processId"].is_number());
        assert_eq!(params["rootUri"], "file:///workspace");
        assert_eq!(params["workspaceFolders"][0]["uri"], "file:///workspace");
        assert_eq!(
            params["capabilities"]["textDocument"]["hover"]["dynamicRegistration"],
            false
        );
        assert_eq!(params["capabilities"]["window"]["workDoneProgress"], true);
    }

    #[test]
    fn test_did_open_params() {
        let params = did_open_params("file:///test.kt", "kotlin", 1, "class A");
        assert_eq!(params["textDocument"]["uri"], "file:///test.kt");
        assert_eq!(params["textDocument"]["languageId"], "kotlin");
        assert_eq!(params["textDocument"]["version"], 1);
        assert_eq!(params["textDocument"]["text"], "class A");
    }

    #[test]
    fn test_did_change_params() {
        let params = did_change_params("file:///test.rs", 2, "fn main() { 42 }");
        assert_eq!(params["textDocument"]["version"], 2);
        assert_eq!(params["contentChanges"][0]["text"], "fn main() { 42 }");
    }

    #[test]
    fn test_position_params_are_zero_based_fields() {
        let params = text_document_position_params("file:///a.kt", Position::new(22, 6));
        assert_eq!(params["textDocument"]["uri"], "file:///a.kt");
        assert_eq!(params["position"], json!({ "line": 22, "character": 6 }));
        assert_eq!(did_close_params("file:///a.kt")["textDocument"]["uri"], "file:///a.kt");
    }

    #[test]
    fn test_hover_markup_content() {
        let hover: Hover = serde_json::from_value(json!({
            "contents": { "kind": "markdown", "value": "```kotlin\nclass Circle\n```" }
        }))
        .unwrap();
        assert_eq!(hover.text(), "```kotlin\nclass Circle\n```");
        assert!(hover.range.is_none());
    }

    #[test]
    fn test_hover_marked_string_array() {
        let hover: Hover = serde_json::from_value(json!({
            "contents": ["plain", { "language": "kotlin", "value": "val x: Int" }],
            "range": range(3)
        }))
        .unwrap();
        assert_eq!(hover.text(), "plain\n\nval x: Int");
        assert_eq!(hover.range.unwrap().start.line, 3);
    }

    #[test]
    fn test_completion_accepts_list_and_array() {
        let list: CompletionResponse = serde_json::from_value(json!({
            "isIncomplete": true,
            "items": [{ "label": "area", "kind": 2, "detail": "Double" }]
        }))
        .unwrap();
        let items = list.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "area");
        assert_eq!(items[0].kind, Some(2));

        let array: CompletionResponse =
            serde_json::from_value(json!([{ "label": "a" }, { "label": "b" }])).unwrap();
        assert_eq!(array.into_items().len(), 2);
    }

    #[test]
    fn test_definition_single_location() {
        let single: DefinitionResponse =
            serde_json::from_value(json!({ "uri": "file:///s.kt", "range": range(7) })).unwrap();
        let locations = single.into_locations();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].uri, "file:///s.kt");
    }

    #[test]
    fn test_definition_location_links_use_selection_range() {
        let links: DefinitionResponse = serde_json::from_value(json!([{
            "targetUri": "file:///shape.kt",
            "targetRange": range(1),
            "targetSelectionRange": range(2)
        }]))
        .unwrap();
        let locations = links.into_locations();
        assert_eq!(locations[0].uri, "file:///shape.kt");
        assert_eq!(locations[0].range.start.line, 2);
    }

    #[test]
    fn test_definition_empty_array() {
        let empty: DefinitionResponse = serde_json::from_value(json!([])).unwrap();
        assert!(empty.into_locations().is_empty());
    }

    #[test]
    fn test_server_capabilities_lookups() {
        let result: InitializeResult = serde_json::from_value(json!({
            "capabilities": {
                "hoverProvider": true,
                "completionProvider": { "triggerCharacters": ["."] },
                "definitionProvider": false,
                "renameProvider": null
            },
            "serverInfo": { "name": "kotlin-analyzer", "version": "0.1.0" }
        }))
        .unwrap();
        assert!(result.capabilities.hover());
        assert!(result.capabilities.completion());
        assert!(!result.capabilities.definition());
        assert!(!result.capabilities.rename());
        assert_eq!(result.server_info.unwrap().name, "kotlin-analyzer");
    }

    #[test]
    fn test_initialize_result_without_capabilities() {
        let result: InitializeResult = serde_json::from_value(json!({})).unwrap();
        assert!(!result.capabilities.hover());
        assert!(result.server_info.is_none());
    }

    #[test]
    fn test_publish_diagnostics_deserialization() {
        let params: PublishDiagnosticsParams = serde_json::from_value(json!({
            "uri": "file:///TypeMismatch.kt",
            "diagnostics": [{
                "range": range(4),
                "severity": 1,
                "source": "kotlin",
                "message": "type mismatch"
            }, {
                "range": range(9),
                "message": "unused variable"
            }]
        }))
        .unwrap();
        assert_eq!(params.diagnostics.len(), 2);
        assert_eq!(params.diagnostics[0].severity, Some(1));
        assert!(params.diagnostics[1].source.is_none());
    }

    #[test]
    fn test_path_to_file_uri_and_back() {
        #[cfg(windows)]
        let path = std::path::PathBuf::from(r"C:\Users\test\src\Main.kt");
        #[cfg(not(windows))]
        let path = std::path::PathBuf::from("/home/test/src/Main.kt");

        let uri = path_to_file_uri(&path).expect("should create URI");
        let roundtrip = file_uri_to_path(uri.as_str()).expect("should parse back to path");
        assert_eq!(roundtrip, path);
    }

    #[test]
    fn test_relative_path_is_not_a_file_uri() {
        assert!(path_to_file_uri(Path::new("relative/Main.kt")).is_err());
    }

    #[test]
    fn test_file_uri_to_path_non_file_scheme() {
        assert!(file_uri_to_path("https://example.com/test.rs").is_none());
        assert!(file_uri_to_path("not-a-uri").is_none());
    }
}
