//! 单次调用的执行上下文

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{HostEnvironment, HostIdentity};

/// 每次工具调用现造一份，只读，不缓存
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub caller_id: String,
    pub requested_at: DateTime<Utc>,
    pub host: HostIdentity,
}

impl ExecutionContext {
    /// 以当前时间与宿主身份快照构造
    pub fn capture(caller_id: impl Into<String>, env: &dyn HostEnvironment) -> Self {
        Self {
            caller_id: caller_id.into(),
            requested_at: Utc::now(),
            host: env.identity(),
        }
    }

    /// 不依赖宿主的上下文（测试、离线规划）
    pub fn detached(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            requested_at: Utc::now(),
            host: HostIdentity {
                host_name: "detached".to_string(),
                environment_version: String::new(),
                document_name: String::new(),
            },
        }
    }
}
