//! 协议引擎：按方法名分发
//!
//! 每帧：解析信封 → 会话准入 → 分发到工具 / 资源注册表或元操作 → 生成响应。
//! 处理器内的 panic 在分发边界被捕获为 internal error，绝不拖垮连接或进程。
//! 通知（无 id）永远不回复。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ServerSection;
use crate::core::{panic_message, RpcError, ToolCallError};
use crate::host::{ExecutionContext, HostEnvironment};
use crate::protocol::message::{
    methods, CallToolParams, InitializeParams, InitializeResult, ListChangedCapability, Request,
    ResourcesCapability, Response, ServerCapabilities, ServerInfo, UriParams,
};
use crate::protocol::session::Session;
use crate::protocol::ToolResult;
use crate::resources::{ReadParams, ResourceRegistry, Subscriber};
use crate::tools::{ToolExecutor, ToolRegistry};

pub struct McpServer {
    info: ServerInfo,
    protocol_version: String,
    tools: ToolExecutor,
    resources: Arc<ResourceRegistry>,
    host: Option<Arc<dyn HostEnvironment>>,
}

impl McpServer {
    pub fn new(cfg: &ServerSection, tools: ToolExecutor, resources: Arc<ResourceRegistry>) -> Self {
        Self {
            info: ServerInfo {
                name: cfg.name.clone(),
                version: cfg.version.clone(),
            },
            protocol_version: cfg.protocol_version.clone(),
            tools,
            resources,
            host: None,
        }
    }

    /// 工具调用的执行上下文从该宿主环境现取身份
    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        self.tools.registry()
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// 处理一帧文本；需要回复时返回响应帧
    pub async fn handle_frame(&self, session: &Arc<Session>, frame: &str) -> Option<String> {
        match Request::parse(frame) {
            Ok(request) => self
                .handle_request(session, request)
                .await
                .map(|r| r.to_frame()),
            Err(e) => {
                tracing::debug!(session = %session.id(), error = %e, "unparseable frame");
                Some(Response::failure(Value::Null, &e).to_frame())
            }
        }
    }

    pub async fn handle_request(&self, session: &Arc<Session>, request: Request) -> Option<Response> {
        let id = request.id.clone();
        let method = request.method.clone();

        let outcome = AssertUnwindSafe(self.dispatch(session, &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(session = %session.id(), method = %method, error = %message, "handler panicked");
                Err(RpcError::Internal(message))
            });

        let Some(id) = id else {
            if let Err(e) = outcome {
                tracing::debug!(session = %session.id(), method = %method, error = %e, "notification failed");
            }
            return None;
        };
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                tracing::debug!(session = %session.id(), method = %method, code = e.code(), "request failed");
                Response::failure(id, &e)
            }
        })
    }

    async fn dispatch(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        match request.method.as_str() {
            methods::INITIALIZE => return self.initialize(session, request),
            methods::INITIALIZED => {
                session.activate();
                return Ok(Value::Null);
            }
            m if m.starts_with("notifications/") && request.is_notification() => {
                tracing::debug!(method = %m, "client notification ignored");
                return Ok(Value::Null);
            }
            _ => {}
        }
        session.admit(&request.method)?;

        match request.method.as_str() {
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.tools().list() })),
            methods::TOOLS_CALL => self.call_tool(session, request).await,
            methods::RESOURCES_LIST => Ok(json!({ "resources": self.resources.list() })),
            methods::RESOURCES_READ => self.read_resource(session, request).await,
            methods::RESOURCES_SUBSCRIBE => self.subscribe(session, request),
            methods::RESOURCES_UNSUBSCRIBE => self.unsubscribe(session, request),
            methods::PROMPTS_LIST => Ok(json!({ "prompts": [] })),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        let params: InitializeParams = request.params_as().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "initialize params ignored");
            InitializeParams::default()
        });
        if let Some(client) = &params.client_info {
            tracing::info!(session = %session.id(), client = %client.name, version = %client.version, "client initialized");
        }
        session.negotiate(params.client_info, params.protocol_version);

        to_value(InitializeResult {
            protocol_version: self.protocol_version.clone(),
            server_info: self.info.clone(),
            capabilities: ServerCapabilities {
                tools: ListChangedCapability { list_changed: false },
                resources: ResourcesCapability {
                    subscribe: true,
                    list_changed: false,
                },
                prompts: ListChangedCapability { list_changed: false },
            },
        })
    }

    async fn call_tool(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        let params: CallToolParams = request.params_as()?;
        let ctx = match &self.host {
            Some(host) => ExecutionContext::capture(session.id(), host.as_ref()),
            None => ExecutionContext::detached(session.id()),
        };
        match self.tools.execute(&params.name, params.arguments, &ctx).await {
            Ok(result) => to_value(result),
            Err(ToolCallError::UnknownTool(name)) => {
                Err(RpcError::InvalidParams(format!("Unknown tool: {}", name)))
            }
            Err(e @ ToolCallError::Timeout(_)) => to_value(ToolResult::error(e.to_string())),
            Err(ToolCallError::Panicked(message)) => Err(RpcError::Internal(message)),
        }
    }

    async fn read_resource(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        let params: UriParams = request.params_as()?;
        let read = ReadParams::new(params.uri.clone(), session.id());
        match self.resources.read(&read).await? {
            Ok(content) => to_value(content),
            Err(e) => Err(RpcError::Internal(format!(
                "Failed to read resource {}: {}",
                params.uri, e
            ))),
        }
    }

    fn subscribe(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        let params: UriParams = request.params_as()?;
        // 回调只持有弱引用，连接关闭后订阅自然失效
        let weak = Arc::downgrade(session);
        let subscriber = Subscriber::new(session.id(), move |uri| {
            let session = weak.upgrade().ok_or_else(|| "session closed".to_string())?;
            session.notify(methods::RESOURCE_UPDATED, json!({ "uri": uri }))
        });
        self.resources.subscribe(&params.uri, subscriber)?;
        Ok(json!({}))
    }

    fn unsubscribe(&self, session: &Arc<Session>, request: &Request) -> Result<Value, RpcError> {
        let params: UriParams = request.params_as()?;
        self.resources.unsubscribe(&params.uri, session.id())?;
        Ok(json!({}))
    }

    /// 连接关闭：移除该会话在所有资源上的订阅
    pub fn close_session(&self, session: &Session) {
        let removed = self.resources.unsubscribe_all(session.id());
        tracing::info!(session = %session.id(), removed_subscriptions = removed, "session closed");
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal(e.to_string()))
}
