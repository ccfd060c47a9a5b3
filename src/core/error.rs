//! 错误类型
//!
//! 按关注点划分：协议层（RpcError，直接映射为 JSON-RPC error 信封）、桥接队列（BridgeError）、
//! 注册表（RegistryError）、工具调用（ToolCallError）、Agent 规划（AgentError）。业务失败不走这里，而是作为 isError 结果返回。

use thiserror::Error;

/// JSON-RPC 固定错误码
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// 会话尚未完成 initialize 协商
    pub const NOT_INITIALIZED: i64 = -32002;
}

/// 协议层错误：每个变体对应一个固定错误码
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Server not initialized")]
    NotInitialized,
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => codes::PARSE_ERROR,
            RpcError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => codes::INVALID_PARAMS,
            RpcError::Internal(_) => codes::INTERNAL_ERROR,
            RpcError::NotInitialized => codes::NOT_INITIALIZED,
        }
    }
}

impl From<RegistryError> for RpcError {
    fn from(e: RegistryError) -> Self {
        RpcError::InvalidParams(e.to_string())
    }
}

/// 桥接队列中单个操作的失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// 操作自身返回 Err
    #[error("Operation failed: {0}")]
    Failed(String),

    /// 操作执行时 panic，已被捕获
    #[error("Operation panicked: {0}")]
    Panicked(String),

    /// 关闭时仍在队列中、未被执行
    #[error("Operation abandoned at shutdown")]
    Abandoned,

    /// 关闭后才提交
    #[error("Bridge is shut down")]
    ShutDown,
}

/// 注册表错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Resource not found: {0}")]
    NotFound(String),
}

/// 工具调用在进入工具之前或之外的失败；工具自己的业务失败不在此列
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

/// Agent 规划过程中的错误（LLM 调用、输出解析）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    /// 模型给出的计划解析后没有任何可执行步骤
    #[error("Plan has no executable steps")]
    EmptyPlan,
}

/// 把 panic 负载转成可读文本
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_codes_are_fixed() {
        assert_eq!(RpcError::Parse("x".into()).code(), -32700);
        assert_eq!(RpcError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(RpcError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(RpcError::Internal("x".into()).code(), -32603);
        assert_eq!(RpcError::NotInitialized.code(), -32002);
    }

    #[test]
    fn test_registry_error_maps_to_invalid_params() {
        let e: RpcError = RegistryError::NotFound("host://nope".into()).into();
        assert_eq!(e.code(), codes::INVALID_PARAMS);
        assert!(e.to_string().contains("host://nope"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
