//! 宿主协作接口
//!
//! 核心只通过这里的 trait 与宿主交互：枚举 / 执行具名操作、读取具名快照、获取身份与摘要。
//! 宿主内部做什么、为什么必须单线程，核心一概不假设；在主回合执行由 OperationBridge 保证。

pub mod context;
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ContentBlock;

pub use context::ExecutionContext;
pub use memory::InMemoryHost;

/// 操作必须在哪个执行域运行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// 宿主主回合（修改宿主状态的操作）
    Main,
    /// 任意工作线程（线程安全的只读查询）
    Background,
}

/// 宿主操作描述
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub affinity: Affinity,
    /// 成功后会发生变化的资源 URI
    pub touches: Vec<String>,
}

/// 宿主快照描述（暴露为只读资源）
#[derive(Debug, Clone)]
pub struct SnapshotDescriptor {
    pub name: String,
    pub uri: String,
    pub description: String,
}

/// 宿主身份（每次调用时现取，写入 ExecutionContext）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostIdentity {
    pub host_name: String,
    pub environment_version: String,
    pub document_name: String,
}

/// 宿主状态摘要（供 Agent 组装上下文）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub document_name: String,
    pub object_count: usize,
    pub object_names: Vec<String>,
    pub selection: Vec<String>,
}

/// 宿主操作与快照；`execute` / `read_snapshot` 只应在描述声明的执行域内调用
pub trait HostOperations: Send + Sync {
    fn operations(&self) -> Vec<OperationDescriptor>;

    /// 执行具名操作；Err 为业务错误（参数不对、目标不存在等）
    fn execute(&self, name: &str, args: &Value) -> Result<Vec<ContentBlock>, String>;

    fn snapshots(&self) -> Vec<SnapshotDescriptor>;

    fn read_snapshot(&self, name: &str) -> Result<Value, String>;
}

/// 宿主环境：身份与摘要由宿主自行维护，可从任意线程读取
pub trait HostEnvironment: Send + Sync {
    fn identity(&self) -> HostIdentity;

    fn summary(&self) -> HostSummary;
}
