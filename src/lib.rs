//! Stagehand - 宿主编辑器内嵌的 MCP 能力服务器
//!
//! 模块划分：
//! - **agent**: 自主 Agent：规划（模板 / LLM / 兜底）、计划调整、记忆、成本、执行
//! - **bridge**: 主线程 / 后台双队列，把任意线程的请求安全送入宿主单线程回合
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、能力发现、应用组装与优雅关闭
//! - **host**: 宿主协作接口（操作枚举与执行、快照读取）、执行上下文、内存版演示宿主
//! - **llm**: LLM 客户端抽象与 Mock 实现
//! - **observability**: 日志初始化
//! - **protocol**: JSON-RPC 信封、会话状态机、方法分发、换行分帧传输
//! - **resources**: 资源注册表与订阅
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agent;
pub mod bridge;
pub mod config;
pub mod core;
pub mod host;
pub mod llm;
pub mod observability;
pub mod protocol;
pub mod resources;
pub mod tools;

pub use agent::{AgentContextManager, AgentPlanner, Plan, PlanExecutor, Step, StepStatus};
pub use bridge::OperationBridge;
pub use crate::core::{App, AppBuilder};
pub use protocol::McpServer;
pub use resources::ResourceRegistry;
pub use tools::ToolRegistry;
