//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute(name, args, ctx)：查找工具 → 校验参数 → 在超时内执行（捕获 panic），
//! 工具自身的失败转为 isError 结果，查找失败 / 超时 / panic 转为 ToolCallError；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{panic_message, ToolCallError};
use crate::host::ExecutionContext;
use crate::protocol::ToolResult;
use crate::tools::schema::validate_arguments;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并把结果归类
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行指定工具；args 缺省按空对象处理
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Option<Value>,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolCallError> {
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(ToolCallError::UnknownTool(tool_name.to_string()));
        };
        let args = args.unwrap_or_else(|| Value::Object(Default::default()));
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match validate_arguments(&tool.input_schema(), &args) {
            Err(e) => Ok(ToolResult::error(e)),
            Ok(()) => {
                let call = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
                match timeout(self.timeout, call).await {
                    Ok(Ok(Ok(result))) => Ok(result),
                    Ok(Ok(Err(e))) => Ok(ToolResult::error(e)),
                    Ok(Err(payload)) => Err(ToolCallError::Panicked(panic_message(payload.as_ref()))),
                    Err(_) => Err(ToolCallError::Timeout(tool_name.to_string())),
                }
            }
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(r) if !r.is_error => (true, "ok"),
            Ok(_) => (false, "error"),
            Err(ToolCallError::Timeout(_)) => (false, "timeout"),
            Err(_) => (false, "panic"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "caller": ctx.caller_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::{EchoTool, Tool};

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::text("late"))
        }
    }

    struct Faulty;

    #[async_trait]
    impl Tool for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn description(&self) -> &str {
            "fails or panics"
        }
        async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, String> {
            if args.get("panic").is_some() {
                panic!("handler bug");
            }
            Err("target missing".to_string())
        }
    }

    fn executor(timeout_secs: u64) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool);
        registry.register(Slow);
        registry.register(Faulty);
        ToolExecutor::new(registry, timeout_secs)
    }

    #[tokio::test]
    async fn test_success() {
        let ctx = ExecutionContext::detached("t");
        let r = executor(5)
            .execute("echo", Some(json!({"text": "hi"})), &ctx)
            .await
            .unwrap();
        assert!(!r.is_error);
        assert_eq!(r.text_content(), "hi");
    }

    #[tokio::test]
    async fn test_business_failure_and_validation_are_results() {
        let ctx = ExecutionContext::detached("t");
        let exec = executor(5);
        let r = exec.execute("faulty", None, &ctx).await.unwrap();
        assert!(r.is_error);
        assert_eq!(r.text_content(), "target missing");

        let r = exec.execute("echo", Some(json!({})), &ctx).await.unwrap();
        assert!(r.is_error);
        assert!(r.text_content().contains("text"));
    }

    #[tokio::test]
    async fn test_unknown_panic_and_timeout_are_call_errors() {
        let ctx = ExecutionContext::detached("t");
        let exec = executor(1);
        assert_eq!(
            exec.execute("nope", None, &ctx).await,
            Err(ToolCallError::UnknownTool("nope".into()))
        );
        assert_eq!(
            exec.execute("faulty", Some(json!({"panic": true})), &ctx).await,
            Err(ToolCallError::Panicked("handler bug".into()))
        );
        assert_eq!(
            exec.execute("slow", None, &ctx).await,
            Err(ToolCallError::Timeout("slow".into()))
        );
    }
}
