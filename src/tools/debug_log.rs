//! 诊断日志工具：把消息写入服务端日志
//!
//! 兜底计划与权限请求步骤都只调用它，因此它不依赖宿主，永远可用。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::host::ExecutionContext;
use crate::protocol::ToolResult;
use crate::tools::schema::schema_of;
use crate::tools::Tool;

pub const DEBUG_LOG_TOOL: &str = "debug_log";

#[derive(Deserialize, JsonSchema)]
struct DebugLogArgs {
    /// Message to write to the server log
    message: String,
    /// Log level: info, warn or error
    #[serde(default)]
    level: Option<String>,
}

pub struct DebugLogTool;

#[async_trait]
impl Tool for DebugLogTool {
    fn name(&self) -> &str {
        DEBUG_LOG_TOOL
    }

    fn description(&self) -> &str {
        "Write a diagnostic message to the server log."
    }

    fn input_schema(&self) -> Value {
        schema_of::<DebugLogArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, String> {
        let args: DebugLogArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        match args.level.as_deref().unwrap_or("info") {
            "warn" => tracing::warn!(caller = %ctx.caller_id, "{}", args.message),
            "error" => tracing::error!(caller = %ctx.caller_id, "{}", args.message),
            _ => tracing::info!(caller = %ctx.caller_id, "{}", args.message),
        }
        Ok(ToolResult::text(format!("Logged: {}", args.message)))
    }
}
