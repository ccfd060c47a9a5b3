//! JSON-RPC 2.0 信封与 MCP 方法参数 / 结果
//!
//! 一帧一条 JSON。请求的 id 需区分「缺省」（通知，不回复）与「显式 null」（照原样回显）。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const RESOURCE_UPDATED: &str = "notifications/resources/updated";
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// 字段存在即 Some（包括 null），缺省由 `#[serde(default)]` 给 None
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// 入站请求（或通知）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: Value, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// 解析一帧；不是 JSON 或不符合信封结构都按 parse error 处理（id 无法恢复）
    pub fn parse(frame: &str) -> Result<Self, RpcError> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| RpcError::Parse(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| RpcError::Parse(format!("invalid envelope: {}", e)))
    }

    /// 把 params 解析为具体类型，失败时为 invalid params
    pub fn params_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, RpcError> {
        let params = self.params.clone().unwrap_or_else(|| Value::Object(Default::default()));
        serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 响应：result 与 error 恰有其一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: error.code(),
                message: error.to_string(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// 序列化为一帧（不含换行）
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32603,"message":"serialize error: {}"}}}}"#,
                e
            )
        })
    }
}

/// 服务端主动推送的通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// 序列化失败时不产生帧，由调用方决定如何上报
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---- initialize ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    pub subscribe: bool,
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ListChangedCapability,
    pub resources: ResourcesCapability,
    pub prompts: ListChangedCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
}

/// initialize 的请求参数只取客户端身份用于日志，其余忽略
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<ServerInfo>,
}

// ---- tools / resources ----

/// tools/list 中的条目：只有名称、描述、schema，不暴露处理器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UriParams {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_distinguishes_missing_and_null_id() {
        let with_null = Request::parse(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert_eq!(with_null.id, Some(Value::Null));
        assert!(!with_null.is_notification());

        let notification =
            Request::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(notification.id.is_none());
        assert!(notification.is_notification());
    }

    #[test]
    fn test_malformed_frames_are_parse_errors() {
        assert!(matches!(Request::parse("{not json"), Err(RpcError::Parse(_))));
        assert!(matches!(Request::parse("[1,2,3]"), Err(RpcError::Parse(_))));
        assert!(matches!(Request::parse(r#"{"id":1}"#), Err(RpcError::Parse(_))));
    }

    #[test]
    fn test_response_round_trip_keeps_id_and_discriminant() {
        for id in [Value::Null, json!(7), json!("abc")] {
            let ok = Response::success(id.clone(), json!({"tools": []}));
            let parsed: Response = serde_json::from_str(&ok.to_frame()).unwrap();
            assert_eq!(parsed.id, id);
            assert!(parsed.result.is_some() && parsed.error.is_none());

            let err = Response::failure(id.clone(), &RpcError::MethodNotFound("x".into()));
            let parsed: Response = serde_json::from_str(&err.to_frame()).unwrap();
            assert_eq!(parsed.id, id);
            assert!(parsed.result.is_none());
            assert_eq!(parsed.error.unwrap().code, -32601);
        }
    }

    #[test]
    fn test_null_id_is_serialized_explicitly() {
        let frame = Response::failure(Value::Null, &RpcError::Parse("x".into())).to_frame();
        let raw: Value = serde_json::from_str(&frame).unwrap();
        assert!(raw.as_object().unwrap().contains_key("id"));
        assert_eq!(raw["id"], Value::Null);
        assert_eq!(raw["jsonrpc"], "2.0");
    }

    #[test]
    fn test_notification_frame_has_no_id() {
        let frame = Notification::new("notifications/resources/updated", json!({"uri": "host://scene"}))
            .to_frame()
            .unwrap();
        assert!(!frame.is_empty());
        assert!(!frame.contains('\n'));
        let raw: Value = serde_json::from_str(&frame).unwrap();
        assert!(raw.get("id").is_none());
        assert_eq!(raw["params"]["uri"], "host://scene");
    }

    #[test]
    fn test_params_as_reports_invalid_params() {
        let req = Request::new(json!(1), methods::TOOLS_CALL, Some(json!({"arguments": {}})));
        let err = req.params_as::<CallToolParams>().unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)));
    }
}
