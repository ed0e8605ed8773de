//! JSON-RPC 2.0 message model.
//!
//! [`Message`] is what travels inside one frame. Outgoing messages serialize
//! to the `{"jsonrpc":"2.0", ...}` envelope; incoming bodies are classified
//! by [`Message::from_value`] based on which of `id` and `method` are present.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request identifier.
///
/// The client only ever mints numbers; string ids exist because servers may
/// use them for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

/// A response: `result` on success, the error object otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` when the peer answered with `"id": null` (it could not tell
    /// which request the error belongs to).
    pub id: Option<RequestId>,
    pub result: Result<Value, ResponseError>,
}

impl Response {
    pub fn ok(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Ok(result),
        }
    }

    pub fn err(id: impl Into<RequestId>, error: ResponseError) -> Self {
        Self {
            id: Some(id.into()),
            result: Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Classify a parsed body.
    ///
    /// `id` without `method` is a response, `id` with `method` a request,
    /// `method` alone a notification. Returns the reason on anything else.
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        let Value::Object(mut obj) = value else {
            return Err("body is not a JSON object");
        };

        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(method)) => Some(method),
            Some(_) => return Err("method is not a string"),
        };
        let id = obj.remove("id");
        let params = obj.remove("params");

        match (id, method) {
            (Some(id), None) => {
                let id = match id {
                    Value::Null => None,
                    other => Some(parse_id(other)?),
                };
                let result = if let Some(error) = obj.remove("error") {
                    Err(serde_json::from_value::<ResponseError>(error)
                        .map_err(|_| "error member is malformed")?)
                } else if let Some(result) = obj.remove("result") {
                    Ok(result)
                } else {
                    return Err("response has neither result nor error");
                };
                Ok(Self::Response(Response { id, result }))
            }
            (Some(id), Some(method)) => Ok(Self::Request(Request {
                id: parse_id(id)?,
                method,
                params,
            })),
            (None, Some(method)) => Ok(Self::Notification(Notification { method, params })),
            (None, None) => Err("neither id nor method present"),
        }
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

fn parse_id(id: Value) -> Result<RequestId, &'static str> {
    match id {
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or("id is not an integer"),
        Value::String(s) => Ok(RequestId::String(s)),
        _ => Err("id is neither a number nor a string"),
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'static str,
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ResponseError>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Request(r) => WireRequest {
                jsonrpc: "2.0",
                id: &r.id,
                method: &r.method,
                params: r.params.as_ref(),
            }
            .serialize(serializer),
            Self::Notification(n) => WireNotification {
                jsonrpc: "2.0",
                method: &n.method,
                params: n.params.as_ref(),
            }
            .serialize(serializer),
            Self::Response(r) => WireResponse {
                jsonrpc: "2.0",
                id: r.id.as_ref(),
                result: r.result.as_ref().ok(),
                error: r.result.as_ref().err(),
            }
            .serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_serialization_with_params() {
        let req = Message::Request(Request::new(
            42,
            "initialize",
            Some(json!({"rootUri": "file:///"})),
        ));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 42);
        assert_eq!(json["method"], "initialize");
        assert!(json["params"]["rootUri"].is_string());
    }

    #[test]
    fn test_request_serialization_without_params() {
        let req = Message::Request(Request::new(1, "shutdown", None));
        let json = serde_json::to_value(&req).unwrap();
        assert!(
            json.get("params").is_none(),
            "params must be omitted, not null"
        );
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = Message::Notification(Notification::new("initialized", Some(json!({}))));
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "initialized");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_null_result_is_serialized() {
        let resp = Message::Response(Response::ok(2, Value::Null));
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":2,"result":null}"#);
    }

    #[test]
    fn test_error_response_serialization() {
        let resp = Message::Response(Response::err(
            4,
            ResponseError::new(METHOD_NOT_FOUND, "method not found"),
        ));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_classify_response() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}
        }))
        .unwrap();
        assert_eq!(
            msg,
            Message::Response(Response::ok(1, json!({"capabilities": {}})))
        );
    }

    #[test]
    fn test_classify_error_response() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -32601, "message": "method not found"}
        }))
        .unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        let err = resp.result.unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found");
    }

    #[test]
    fn test_classify_null_id_response() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "parse error"}
        }))
        .unwrap();
        assert!(matches!(msg, Message::Response(Response { id: None, .. })));
    }

    #[test]
    fn test_classify_server_request() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": "reg-1", "method": "client/registerCapability", "params": {}
        }))
        .unwrap();
        let Message::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::String("reg-1".to_string()));
        assert_eq!(req.method, "client/registerCapability");
    }

    #[test]
    fn test_classify_notification() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "method": "window/logMessage", "params": {"type": 3, "message": "hi"}
        }))
        .unwrap();
        assert_eq!(msg.method(), Some("window/logMessage"));
        assert!(matches!(msg, Message::Notification(_)));
    }

    #[test]
    fn test_classify_rejects_unclassifiable() {
        assert!(Message::from_value(json!({"jsonrpc": "2.0"})).is_err());
        assert!(Message::from_value(json!([1, 2])).is_err());
        assert!(Message::from_value(json!({"id": 1})).is_err());
        assert!(Message::from_value(json!({"method": 7})).is_err());
        assert!(Message::from_value(json!({"id": 1.5, "result": null})).is_err());
    }

    #[test]
    fn test_value_roundtrip_preserves_message() {
        let messages = [
            Message::Request(Request::new(3, "textDocument/hover", Some(json!({"a": [1]})))),
            Message::Notification(Notification::new("exit", None)),
            Message::Response(Response::ok(7, Value::Null)),
            Message::Response(Response::err(8, ResponseError::new(-1, "boom"))),
        ];
        for msg in messages {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(Message::from_value(value).unwrap(), msg);
        }
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::Number(3).to_string(), "3");
        assert_eq!(RequestId::String("a".into()).to_string(), "\"a\"");
    }
}
